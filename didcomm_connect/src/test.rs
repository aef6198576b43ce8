use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    DidRegistrar, Error, HandshakeConfig, LocalKms, MemoryStateStore, Outbound, Outcome,
    Packager, PackerRegistry, PairwiseAgent, SecurePipe, StateKey,
    crypto::{Crypto, CryptoError, KeyManager},
    definitions::{PackedMessage, PublicVerificationKeyData},
    did::{DidDoc, DidMethod},
    forward::{ForwardRouter, Peeled},
    handshake::{self, HandshakeState, HandshakeTask, OwnDid, Role, Step, Version},
    messages::{Complete, Message, ProblemCode},
    packer::{Envelope, PackerKind},
    pairwise::problem_report,
    pipe::{Identity, OwnedIdentity},
};

const INVITATION_ID: &str = "inv-1";

fn agent(label: &str, endpoint: &str, version: Version) -> PairwiseAgent {
    PairwiseAgent::from_config(
        HandshakeConfig::new(label, endpoint.parse().unwrap()).with_version(version),
        LocalKms::new(),
        Arc::new(MemoryStateStore::new()),
    )
}

fn faber(version: Version) -> PairwiseAgent {
    agent("Faber", "https://faber.example/agent", version)
}

fn alice(version: Version) -> PairwiseAgent {
    agent("Alice", "https://alice.example/agent", version)
}

fn reply(outcome: Outcome) -> (StateKey, Outbound) {
    match outcome {
        Outcome::Reply {
            state_key,
            outbound,
        } => (state_key, outbound),
        other => panic!("expected a reply, got {other:?}"),
    }
}

fn state(agent: &PairwiseAgent, key: &StateKey) -> HandshakeState {
    agent.tracker().status(key).unwrap().unwrap().state
}

struct Handshake {
    alice_key: StateKey,
    faber_key: StateKey,
}

fn handshake(faber: &PairwiseAgent, alice: &PairwiseAgent) -> Handshake {
    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (alice_key, request) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();
    assert_eq!(state(alice, &alice_key), HandshakeState::Waiting);
    assert_eq!(request.endpoint.as_str(), "https://faber.example/agent");

    let (faber_key, response) = reply(faber.handle_inbound(&request.message).unwrap());
    assert_eq!(state(faber, &faber_key), HandshakeState::Waiting);
    assert_eq!(response.endpoint.as_str(), "https://alice.example/agent");

    let (_, complete) = reply(alice.handle_inbound(&response.message).unwrap());
    assert_eq!(state(alice, &alice_key), HandshakeState::ReadyAck);

    assert_eq!(
        faber.handle_inbound(&complete.message).unwrap(),
        Outcome::Completed {
            state_key: faber_key.clone()
        }
    );

    Handshake {
        alice_key,
        faber_key,
    }
}

fn assert_connected(faber: &PairwiseAgent, alice: &PairwiseAgent, keys: &Handshake) {
    assert_eq!(keys.alice_key.nonce, INVITATION_ID);
    assert_eq!(keys.faber_key.nonce, INVITATION_ID);

    let alice_status = alice.tracker().status(&keys.alice_key).unwrap().unwrap();
    let faber_status = faber.tracker().status(&keys.faber_key).unwrap().unwrap();

    assert_eq!(alice_status.state, HandshakeState::ReadyAck);
    assert_eq!(faber_status.state, HandshakeState::ReadyAck);

    // both sides agree on who is who
    assert_eq!(alice_status.mine.did, keys.alice_key.owner_did);
    assert_eq!(faber_status.mine.did, keys.faber_key.owner_did);
    assert_eq!(alice_status.theirs.did, faber_status.mine.did);
    assert_eq!(faber_status.theirs.did, alice_status.mine.did);
    assert_eq!(alice_status.theirs.verkey, faber_status.mine.verkey);
    assert_eq!(faber_status.theirs.verkey, alice_status.mine.verkey);
    assert!(alice_status.mine.is_mine && !alice_status.theirs.is_mine);
}

#[test]
fn legacy_handshake() {
    let (faber, alice) = (faber(Version::Legacy), alice(Version::Legacy));
    let keys = handshake(&faber, &alice);

    assert_connected(&faber, &alice, &keys);

    let record = faber.tracker().get(&keys.faber_key).unwrap().unwrap();
    assert_eq!(record.version, Version::Legacy);
    assert_eq!(record.peer_label, "Alice");
}

#[test]
fn legacy_response_is_signed_with_the_pairwise_key() {
    let (faber, alice) = (faber(Version::Legacy), alice(Version::Legacy));

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let target = invitation.invitation_target().unwrap();
    let (_, request) = alice.caller().connect(&target).unwrap();
    let (faber_key, response) = reply(faber.handle_inbound(&request.message).unwrap());

    let envelope = alice.unpack(&response.message).unwrap();
    let Message::ConnectionResponse(response) = Message::decode(&envelope.message).unwrap() else {
        panic!("expected a connection response");
    };

    let faber_verkey = faber.tracker().get(&faber_key).unwrap().unwrap().mine().verkey.unwrap();
    assert_eq!(response.connection_sig.signer, faber_verkey.to_base58());
    assert_ne!(faber_verkey, target.recipient_keys[0]);
}

#[test]
fn current_handshake() {
    let (faber, alice) = (faber(Version::Current), alice(Version::Current));
    let keys = handshake(&faber, &alice);

    assert_connected(&faber, &alice, &keys);

    let record = alice.tracker().get(&keys.alice_key).unwrap().unwrap();
    assert_eq!(record.version, Version::Current);
    assert_eq!(record.peer_label, "Faber");
    assert!(keys.alice_key.owner_did.starts_with("did:peer:0z"));
}

#[test]
fn legacy_handshake_with_unqualified_dids() {
    let faber = PairwiseAgent::from_config(
        HandshakeConfig::new("Faber", "https://faber.example/agent".parse().unwrap())
            .with_version(Version::Legacy)
            .with_did_method(DidMethod::Sov),
        LocalKms::new(),
        Arc::new(MemoryStateStore::new()),
    );
    let alice = PairwiseAgent::from_config(
        HandshakeConfig::new("Alice", "https://alice.example/agent".parse().unwrap())
            .with_did_method(DidMethod::Sov),
        LocalKms::new(),
        Arc::new(MemoryStateStore::new()),
    );

    let keys = handshake(&faber, &alice);
    assert_connected(&faber, &alice, &keys);
    assert!(!keys.alice_key.owner_did.starts_with("did:"));
    assert!(!keys.faber_key.owner_did.starts_with("did:"));
}

fn deliver(routers: &[Arc<PackerRegistry>], mut packed: Vec<u8>, final_key: &str) -> Vec<u8> {
    for router in routers {
        match ForwardRouter::new(router.as_ref()).peel(&packed).unwrap() {
            Peeled::Forward { to, msg } => {
                packed = msg;
                if Arc::ptr_eq(router, routers.last().unwrap()) {
                    assert_eq!(to, final_key);
                }
            }
            Peeled::Message(_) => panic!("router received a non-forward message"),
        }
    }

    packed
}

#[test]
fn handshake_through_routers() {
    let routers = (0..3)
        .map(|_| Arc::new(PackerRegistry::new(LocalKms::new())))
        .collect::<Vec<_>>();
    let routing_keys = routers
        .iter()
        .map(|r| r.kms().create_key().unwrap().public_key)
        .collect::<Vec<PublicVerificationKeyData>>();

    let faber = PairwiseAgent::from_config(
        HandshakeConfig::new("Faber", "https://faber.example/agent".parse().unwrap())
            .with_routing_keys(routing_keys.clone()),
        LocalKms::new(),
        Arc::new(MemoryStateStore::new()),
    );
    let alice = alice(Version::Current);

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let target = invitation.invitation_target().unwrap();
    assert_eq!(target.routing_keys, routing_keys);

    let (alice_key, request) = alice.caller().connect(&target).unwrap();

    // the first router cannot be skipped
    assert!(faber.handle_inbound(&request.message).is_err());

    let request = deliver(&routers, request.message, &target.recipient_keys[0].to_base58());
    let (faber_key, response) = reply(faber.handle_inbound(&request).unwrap());

    // alice announced no routers
    let (_, complete) = reply(alice.handle_inbound(&response.message).unwrap());

    let faber_verkey = faber
        .tracker()
        .get(&faber_key)
        .unwrap()
        .unwrap()
        .mine()
        .verkey
        .unwrap();
    let complete = deliver(&routers, complete.message, &faber_verkey.to_base58());

    assert_eq!(
        faber.handle_inbound(&complete).unwrap(),
        Outcome::Completed {
            state_key: faber_key.clone()
        }
    );
    assert_eq!(state(&alice, &alice_key), HandshakeState::ReadyAck);
    assert_eq!(state(&faber, &faber_key), HandshakeState::ReadyAck);
}

#[test]
fn redelivered_request_is_ignored() {
    for version in [Version::Legacy, Version::Current] {
        let (faber, alice) = (faber(version), alice(version));

        let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
        let (_, request) = alice
            .caller()
            .connect(&invitation.invitation_target().unwrap())
            .unwrap();

        let (faber_key, _) = reply(faber.handle_inbound(&request.message).unwrap());
        let before = faber.tracker().get(&faber_key).unwrap();

        assert_eq!(
            faber.handle_inbound(&request.message).unwrap(),
            Outcome::Duplicate {
                state_key: faber_key.clone()
            }
        );
        assert_eq!(faber.tracker().get(&faber_key).unwrap(), before);
    }
}

#[test]
fn redelivered_response_and_completion_are_ignored() {
    let (faber, alice) = (faber(Version::Current), alice(Version::Current));

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (alice_key, request) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();
    let (faber_key, response) = reply(faber.handle_inbound(&request.message).unwrap());
    let (_, complete) = reply(alice.handle_inbound(&response.message).unwrap());
    faber.handle_inbound(&complete.message).unwrap();

    assert_eq!(
        alice.handle_inbound(&response.message).unwrap(),
        Outcome::Duplicate {
            state_key: alice_key.clone()
        }
    );
    assert_eq!(
        faber.handle_inbound(&complete.message).unwrap(),
        Outcome::Duplicate {
            state_key: faber_key.clone()
        }
    );
    assert_eq!(state(&alice, &alice_key), HandshakeState::ReadyAck);
    assert_eq!(state(&faber, &faber_key), HandshakeState::ReadyAck);
}

#[test]
fn response_without_pending_request() {
    let faber = faber(Version::Current);
    let kms = LocalKms::new();
    let alice = PairwiseAgent::from_config(
        HandshakeConfig::new("Alice", "https://alice.example/agent".parse().unwrap()),
        kms.clone(),
        Arc::new(MemoryStateStore::new()),
    );

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (_, request) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();
    let (_, response) = reply(faber.handle_inbound(&request.message).unwrap());

    // same keys, but the pending request was lost
    let forgetful = PairwiseAgent::from_config(
        HandshakeConfig::new("Alice", "https://alice.example/agent".parse().unwrap()),
        kms,
        Arc::new(MemoryStateStore::new()),
    );

    assert!(matches!(
        forgetful.caller().handle_response(&response.message),
        Err(Error::MissingPendingState(_))
    ));
}

#[test]
fn request_without_invitation() {
    let faber = faber(Version::Legacy);
    let alice = alice(Version::Legacy);

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (_, request) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();

    // a callee sharing the keys but not the invitation index
    let stranger = PairwiseAgent::new(
        faber.config().clone(),
        Arc::new(PackerRegistry::new(LocalKms::new())),
        Arc::new(MemoryStateStore::new()),
    );
    assert!(stranger.handle_inbound(&request.message).is_err());

    let mut target = invitation.invitation_target().unwrap();
    target.id = "some-other-thread".to_string();
    let (_, request) = alice.caller().connect(&target).unwrap();

    assert!(matches!(
        faber.handle_inbound(&request.message),
        Err(Error::State(_))
    ));
}

#[test]
fn unauthenticated_completion_is_rejected() {
    let (faber, alice) = (faber(Version::Current), alice(Version::Current));

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (_, request) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();
    let (faber_key, _) = reply(faber.handle_inbound(&request.message).unwrap());
    let faber_verkey = faber
        .tracker()
        .get(&faber_key)
        .unwrap()
        .unwrap()
        .mine()
        .verkey
        .unwrap();

    let mallory = Arc::new(PackerRegistry::new(LocalKms::new()));
    let mallory_key = mallory.kms().create_key().unwrap().public_key;
    let pipe = SecurePipe::new(
        Some(OwnedIdentity::new(Identity::new(mallory_key), mallory)),
        Some(Identity::new(faber_verkey)),
    );
    let forged = Message::Complete(Complete::new(INVITATION_ID, Some(INVITATION_ID)));
    let (packed, _) = pipe.pack(&forged.encode().unwrap()).unwrap();

    assert!(matches!(
        faber.handle_inbound(&packed),
        Err(Error::Crypto(CryptoError::SignatureInvalid(_)))
    ));
    assert_eq!(state(&faber, &faber_key), HandshakeState::Waiting);
}

#[test]
fn claiming_the_did_of_another_peer() {
    for version in [Version::Legacy, Version::Current] {
        let (faber, alice) = (faber(version), alice(version));
        let keys = handshake(&faber, &alice);
        let alice_did = keys.alice_key.owner_did.clone();

        let invitation = faber.callee().invite_with_id("inv-2").unwrap();
        let target = invitation.invitation_target().unwrap();

        // mallory presents alice's DID with a document listing her own key
        let mallory = Arc::new(PackerRegistry::new(LocalKms::new()));
        let mallory_key = mallory.kms().create_key().unwrap().public_key;
        let pipe = SecurePipe::new(
            Some(OwnedIdentity::new(Identity::new(mallory_key), mallory.clone())),
            Some(Identity::from_invitation(&target).unwrap()),
        );
        let claimed = OwnDid {
            did: alice_did.clone(),
            doc: DidDoc::new(
                &alice_did,
                &mallory_key,
                "https://mallory.example/".parse().unwrap(),
                &[],
            ),
        };
        let task = HandshakeTask {
            nonce: "inv-2".to_string(),
            thread_id: "inv-2".to_string(),
            role: Role::Caller,
            label: "Alice".to_string(),
            endpoint: pipe.peer_endpoint().unwrap(),
            did_method: DidMethod::Peer,
            version,
        };
        let request = handshake::build_request(&task, &pipe, &claimed).unwrap();
        let (packed, _) = pipe.pack_authenticated(&request.encode().unwrap()).unwrap();

        assert!(matches!(
            faber.handle_inbound(&packed),
            Err(Error::MalformedAttachment(_))
        ));

        // the relationship with alice still routes to alice
        let outbound = faber.pack_for(&keys.faber_key, b"still alice").unwrap();
        assert_eq!(outbound.endpoint.as_str(), "https://alice.example/agent");
        assert_eq!(alice.unpack(&outbound.message).unwrap().message, b"still alice");
        assert!(mallory.unpack(&outbound.message).is_err());
    }
}

#[test]
fn handshake_with_anonymous_primary_packer() {
    for version in [Version::Legacy, Version::Current] {
        let agent = |label: &str, endpoint: &str| {
            PairwiseAgent::from_config(
                HandshakeConfig::new(label, endpoint.parse().unwrap())
                    .with_version(version)
                    .with_primary_packer(PackerKind::Anoncrypt),
                LocalKms::new(),
                Arc::new(MemoryStateStore::new()),
            )
        };
        let faber = agent("Faber", "https://faber.example/agent");
        let alice = agent("Alice", "https://alice.example/agent");

        let keys = handshake(&faber, &alice);
        assert_connected(&faber, &alice, &keys);

        // traffic after the handshake uses the configured packer
        let outbound = faber.pack_for(&keys.faber_key, b"anonymous").unwrap();
        let envelope = alice.unpack(&outbound.message).unwrap();
        assert_eq!(envelope.message, b"anonymous");
        assert_eq!(envelope.from_key, None);
    }
}

/// Packager whose next pack fails once armed
struct FailingOnce {
    inner: PackerRegistry,
    armed: AtomicBool,
}

impl FailingOnce {
    fn new() -> Self {
        Self {
            inner: PackerRegistry::new(LocalKms::new()),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Packager for FailingOnce {
    fn pack(&self, envelope: &Envelope) -> Result<PackedMessage, CryptoError> {
        self.pack_with(PackerKind::Authcrypt, envelope)
    }

    fn pack_with(
        &self,
        kind: PackerKind,
        envelope: &Envelope,
    ) -> Result<PackedMessage, CryptoError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            return Err(CryptoError::EncryptionFailed("out of entropy".to_string()));
        }

        self.inner.pack_with(kind, envelope)
    }

    fn unpack(&self, packed: &[u8]) -> Result<Envelope, CryptoError> {
        self.inner.unpack(packed)
    }

    fn kms(&self) -> &dyn KeyManager {
        self.inner.kms()
    }

    fn crypto(&self) -> &dyn Crypto {
        self.inner.crypto()
    }
}

#[test]
fn failed_replies_are_retried_on_redelivery() {
    for version in [Version::Legacy, Version::Current] {
        let agent = |label: &str, endpoint: &str, packager: Arc<FailingOnce>| {
            PairwiseAgent::new(
                HandshakeConfig::new(label, endpoint.parse().unwrap()).with_version(version),
                packager,
                Arc::new(MemoryStateStore::new()),
            )
        };
        let faber_packager = Arc::new(FailingOnce::new());
        let alice_packager = Arc::new(FailingOnce::new());
        let faber = agent("Faber", "https://faber.example/agent", faber_packager.clone());
        let alice = agent("Alice", "https://alice.example/agent", alice_packager.clone());

        let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
        let (alice_key, request) = alice
            .caller()
            .connect(&invitation.invitation_target().unwrap())
            .unwrap();

        faber_packager.arm();
        assert!(matches!(
            faber.handle_inbound(&request.message),
            Err(Error::Crypto(CryptoError::EncryptionFailed(_)))
        ));
        let (faber_key, response) = reply(faber.handle_inbound(&request.message).unwrap());
        assert_eq!(state(&faber, &faber_key), HandshakeState::Waiting);

        alice_packager.arm();
        assert!(alice.handle_inbound(&response.message).is_err());
        assert_eq!(state(&alice, &alice_key), HandshakeState::Waiting);
        let (_, complete) = reply(alice.handle_inbound(&response.message).unwrap());
        assert_eq!(state(&alice, &alice_key), HandshakeState::ReadyAck);

        assert_eq!(
            faber.handle_inbound(&complete.message).unwrap(),
            Outcome::Completed {
                state_key: faber_key
            }
        );
    }
}

#[test]
fn messages_after_the_handshake() {
    let (faber, alice) = (faber(Version::Legacy), alice(Version::Legacy));
    let keys = handshake(&faber, &alice);

    let outbound = faber
        .pack_for(&keys.faber_key, b"{\"content\":\"hello alice\"}")
        .unwrap();
    assert_eq!(outbound.endpoint.as_str(), "https://alice.example/agent");

    let envelope = alice.unpack(&outbound.message).unwrap();
    assert_eq!(envelope.message, b"{\"content\":\"hello alice\"}");

    let alice_record = alice.tracker().get(&keys.alice_key).unwrap().unwrap();
    assert_eq!(envelope.from_key, alice_record.theirs().verkey);
    assert_eq!(envelope.to_keys, vec![alice_record.mine().verkey.unwrap()]);

    let pipe = alice.pipe_for(&keys.alice_key).unwrap();
    let (signature, signer) = pipe.sign(b"attest").unwrap();
    assert_eq!(Some(signer), alice_record.mine().verkey);

    let faber_pipe = faber.pipe_for(&keys.faber_key).unwrap();
    assert_eq!(
        faber_pipe.verify(b"attest", &signature, None).unwrap(),
        (true, signer)
    );

    assert!(matches!(
        faber.pipe_for(&StateKey::new("did:peer:0zUnknown", INVITATION_ID)),
        Err(Error::MissingPendingState(_))
    ));
}

#[derive(Default)]
struct RecordingRegistrar {
    registered: Mutex<Vec<String>>,
}

impl DidRegistrar for RecordingRegistrar {
    fn register(&self, did: &str, doc: &DidDoc) -> Result<(), Error> {
        assert_eq!(doc.id, did);
        self.registered.lock().unwrap().push(did.to_string());

        Ok(())
    }
}

#[test]
fn dids_are_registered_before_use() {
    let registrar = Arc::new(RecordingRegistrar::default());
    let faber = faber(Version::Current);
    let alice = alice(Version::Current).with_registrar(registrar.clone());

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (alice_key, _) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();

    assert_eq!(
        *registrar.registered.lock().unwrap(),
        vec![alice_key.owner_did.clone()]
    );
}

struct RefusingRegistrar;

impl DidRegistrar for RefusingRegistrar {
    fn register(&self, _did: &str, _doc: &DidDoc) -> Result<(), Error> {
        Err(Error::Unsupported("ledger offline"))
    }
}

#[test]
fn failed_registration_aborts_the_request() {
    let faber = faber(Version::Current);
    let alice = alice(Version::Current).with_registrar(Arc::new(RefusingRegistrar));

    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    assert!(matches!(
        alice
            .caller()
            .connect(&invitation.invitation_target().unwrap()),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn problem_reports() {
    let (faber, alice) = (faber(Version::Current), alice(Version::Current));
    let invitation = faber.callee().invite_with_id(INVITATION_ID).unwrap();
    let (alice_key, _) = alice
        .caller()
        .connect(&invitation.invitation_target().unwrap())
        .unwrap();

    let error = Error::Crypto(CryptoError::SignatureInvalid("key".to_string()));
    let Message::ProblemReport(report) =
        problem_report(&error, Step::Request, INVITATION_ID, Version::Current)
    else {
        panic!("expected a problem report");
    };
    assert_eq!(report.problem_code, ProblemCode::RequestNotAccepted.as_str());
    assert_eq!(report.header.thread_id(), INVITATION_ID);

    let Message::ProblemReport(report) =
        problem_report(&Error::Internal, Step::Response, INVITATION_ID, Version::Legacy)
    else {
        panic!("expected a problem report");
    };
    assert_eq!(report.problem_code, "response_processing_error");

    // a report from faber reaches alice as an outcome, not an error
    let alice_verkey = alice
        .tracker()
        .get(&alice_key)
        .unwrap()
        .unwrap()
        .mine()
        .verkey
        .unwrap();
    let faber_kms = Arc::new(PackerRegistry::new(LocalKms::new()));
    let faber_verkey = faber_kms.kms().create_key().unwrap().public_key;
    let pipe = SecurePipe::new(
        Some(OwnedIdentity::new(Identity::new(faber_verkey), faber_kms)),
        Some(Identity::new(alice_verkey)),
    );
    let report = problem_report(&error, Step::Request, INVITATION_ID, Version::Current);
    let (packed, _) = pipe.pack(&report.encode().unwrap()).unwrap();

    let Outcome::Problem(received) = alice.handle_inbound(&packed).unwrap() else {
        panic!("expected a problem outcome");
    };
    assert_eq!(received.problem_code, "request_not_accepted");
    assert_eq!(state(&alice, &alice_key), HandshakeState::Waiting);
}
