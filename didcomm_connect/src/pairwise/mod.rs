use std::sync::Arc;

use tracing::{debug, trace, warn};
use url::Url;

use crate::{
    Error,
    config::HandshakeConfig,
    crypto::LocalKms,
    definitions::{PackedMessage, PublicVerificationKeyData},
    did::DidDoc,
    handshake::{HandshakeState, OwnDid, Step, Version},
    messages::{Message, ProblemCode, ProblemReport},
    packer::{Envelope, Packager, PackerRegistry},
    pipe::{Identity, OwnedIdentity, SecurePipe},
    state::{ProtocolStateTracker, StateKey, StateStore},
};

mod callee;
mod caller;

pub use callee::Callee;
pub use caller::Caller;

/// Publishes newly created DIDs (e.g. to a ledger) before they are used
pub trait DidRegistrar: Send + Sync {
    fn register(&self, did: &str, doc: &DidDoc) -> Result<(), Error>;
}

/// Bytes for the transport, and where to deliver them
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub endpoint: Url,
    pub message: PackedMessage,
}

/// Result of handling one inbound handshake message
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The next handshake message must be delivered
    Reply {
        state_key: StateKey,
        outbound: Outbound,
    },
    /// Our side reached [HandshakeState::ReadyAck]; nothing left to send
    Completed { state_key: StateKey },
    /// The message was handled before; the record is untouched
    Duplicate { state_key: StateKey },
    /// The peer reported a problem with the handshake
    Problem(ProblemReport),
}

/// A connection agent: one key store, one packager and one state store
///
/// Use [PairwiseAgent::caller] to accept invitations and [PairwiseAgent::callee]
/// to issue them; [PairwiseAgent::handle_inbound] dispatches any inbound message
/// to the right role.
#[derive(Clone)]
pub struct PairwiseAgent {
    config: HandshakeConfig,
    packager: Arc<dyn Packager>,
    tracker: ProtocolStateTracker,
    registrar: Option<Arc<dyn DidRegistrar>>,
}

impl std::fmt::Debug for PairwiseAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairwiseAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PairwiseAgent {
    pub fn new(
        config: HandshakeConfig,
        packager: Arc<dyn Packager>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            packager,
            tracker: ProtocolStateTracker::new(store),
            registrar: None,
        }
    }

    /// Agent with a [PackerRegistry] over `kms`, using the configured primary packer
    pub fn from_config(config: HandshakeConfig, kms: LocalKms, store: Arc<dyn StateStore>) -> Self {
        let packager = PackerRegistry::new(kms).with_primary(config.primary_packer);

        Self::new(config, Arc::new(packager), store)
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn DidRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ProtocolStateTracker {
        &self.tracker
    }

    pub fn caller(&self) -> Caller<'_> {
        Caller::new(self)
    }

    pub fn callee(&self) -> Callee<'_> {
        Callee::new(self)
    }

    /// Unpack an inbound envelope and hand it to the role it is meant for
    pub fn handle_inbound(&self, packed: &[u8]) -> Result<Outcome, Error> {
        let (message, envelope) = self.open(packed)?;

        match message {
            Message::ConnectionRequest(_) | Message::ExchangeRequest(_) => {
                self.callee().process_request(&message, &envelope)
            }
            Message::ConnectionResponse(_) | Message::ExchangeResponse(_) => {
                self.caller().process_response(&message, &envelope)
            }
            Message::Ack(_) | Message::Complete(_) => {
                self.callee().process_complete(&message, &envelope)
            }
            Message::ProblemReport(report) => {
                warn!(
                    "peer reported '{}' on thread {}: {}",
                    report.problem_code,
                    report.header.thread_id(),
                    report.explain
                );
                Ok(Outcome::Problem(report))
            }
            other => Err(Error::UnexpectedMessage(other.message_type().to_string())),
        }
    }

    /// Build a pipe for messages on an established relationship
    pub fn pipe_for(&self, state_key: &StateKey) -> Result<SecurePipe, Error> {
        let record = self
            .tracker
            .get(state_key)?
            .ok_or_else(|| Error::MissingPendingState(state_key.to_string()))?;

        let mine = record.mine();
        let theirs = record.theirs();
        let (Some(own_key), Some(peer_key)) = (mine.verkey, theirs.verkey) else {
            return Err(Error::MissingPendingState(state_key.to_string()));
        };

        let peer_doc = self.tracker.peer_doc(state_key)?;

        Ok(self.pipe(
            &own_key,
            &mine.did,
            Some(Identity::new(peer_key).with_did(&theirs.did, peer_doc)),
        ))
    }

    /// Pack `plaintext` for the peer of an established relationship
    pub fn pack_for(&self, state_key: &StateKey, plaintext: &[u8]) -> Result<Outbound, Error> {
        let pipe = self.pipe_for(state_key)?;
        let (message, _) = pipe.pack(plaintext)?;

        Ok(Outbound {
            endpoint: pipe.peer_endpoint()?,
            message,
        })
    }

    /// Unpack a message that arrived over an established relationship
    pub fn unpack(&self, packed: &[u8]) -> Result<Envelope, Error> {
        Ok(self.packager.unpack(packed)?)
    }

    fn open(&self, packed: &[u8]) -> Result<(Message, Envelope), Error> {
        let envelope = self.packager.unpack(packed)?;
        let message = Message::decode(&envelope.message)?;
        trace!("received {} on thread {}", message.message_type(), message.thread_id());

        Ok((message, envelope))
    }

    /// Create a key and pairwise DID, registering it before it is used on the wire
    fn create_own_did(&self) -> Result<(OwnDid, PublicVerificationKeyData), Error> {
        let key = self.packager.kms().create_key()?;
        let own = OwnDid::new(
            self.config.did_method,
            &key.public_key,
            self.config.endpoint.clone(),
            &self.config.routing_keys,
        );

        if let Some(registrar) = &self.registrar {
            registrar.register(&own.did, &own.doc)?;
        }
        self.tracker.index_own_key(&key.public_key, &own.did)?;
        debug!("created pairwise DID {}", own.did);

        Ok((own, key.public_key))
    }

    fn pipe(
        &self,
        own_key: &PublicVerificationKeyData,
        own_did: &str,
        peer: Option<Identity>,
    ) -> SecurePipe {
        SecurePipe::new(
            Some(OwnedIdentity::new(
                Identity::new(*own_key).with_did(own_did, None),
                self.packager.clone(),
            )),
            peer,
        )
    }

    /// Our DID owning the key that opened an inbound envelope
    fn recipient_did(&self, envelope: &Envelope, thread_id: &str) -> Result<String, Error> {
        envelope
            .to_keys
            .first()
            .map(|key| self.tracker.own_did_by_key(key))
            .transpose()?
            .flatten()
            .ok_or_else(|| Error::MissingPendingState(thread_id.to_string()))
    }

    /// Handshake messages are always authcrypted; the peer checks the sender key
    fn pack(&self, pipe: &SecurePipe, message: &Message) -> Result<Outbound, Error> {
        let (packed, _) = pipe.pack_authenticated(&message.encode()?)?;

        Ok(Outbound {
            endpoint: pipe.peer_endpoint()?,
            message: packed,
        })
    }
}

/// Problem report answering a failed inbound `step` on thread `thid`
pub fn problem_report(error: &Error, step: Step, thid: &str, version: Version) -> Message {
    let code = ProblemCode::classify(error, step != Step::Request);

    Message::ProblemReport(ProblemReport::new(version, thid, code, &error.to_string()))
}

pub(crate) fn log_transition(state_key: &StateKey, from: Option<HandshakeState>, to: HandshakeState) {
    debug!("{state_key}: {from:?} -> {to:?}");
}
