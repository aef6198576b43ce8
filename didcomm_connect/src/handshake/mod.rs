//! The connection handshake: invitation, request, response, complete.
//!
//! Two wire formats share the four steps. The legacy format (`connections/1.0`)
//! carries the requester's DID document inline and proves the responder's DID
//! with a timestamped connection signature; the current format (`didexchange/1.0`)
//! carries both documents as signed attachments.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    Error,
    crypto::{Crypto, CryptoError},
    definitions::PublicVerificationKeyData,
    did::{self, DidDoc, DidMethod},
    messages::Message,
    pipe::{Identity, SecurePipe},
    signature::Freshness,
};

mod current;
mod legacy;
mod machine;

pub use machine::{HandshakeEvent, HandshakeMachine, HandshakeState, StateError, Step, Transition};

/// Wire format of the handshake
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// `connections/1.0`
    Legacy,
    /// `didexchange/1.0`
    #[default]
    Current,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initiator: accepts an invitation and sends the request
    Caller,
    /// Responder: issued the invitation and answers the request
    Callee,
}

/// Ephemeral context of one handshake step, rebuilt for every inbound message
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeTask {
    /// Our pairing nonce; messages we build are threaded with it
    pub nonce: String,
    /// Invitation id, the thread id of the whole exchange
    pub thread_id: String,
    pub role: Role,
    pub label: String,
    /// Where the next message goes
    pub endpoint: Url,
    pub did_method: DidMethod,
    pub version: Version,
}

impl HandshakeTask {
    /// Run `f` with the thread id standing in for our pairing nonce
    ///
    /// The responder's own nonce (the id of the request it answers) may differ
    /// from the invitation id that peers expect as thread of the response.
    pub fn with_thread_nonce<T>(&mut self, f: impl FnOnce(&HandshakeTask) -> T) -> T {
        let own = std::mem::replace(&mut self.nonce, self.thread_id.clone());
        let result = f(self);
        self.nonce = own;

        result
    }
}

/// Our freshly created pairwise DID
#[derive(Clone, Debug, PartialEq)]
pub struct OwnDid {
    pub did: String,
    pub doc: DidDoc,
}

impl OwnDid {
    pub fn new(
        method: DidMethod,
        verkey: &PublicVerificationKeyData,
        endpoint: Url,
        routing_keys: &[PublicVerificationKeyData],
    ) -> Self {
        let did = method.create_did(verkey);
        let doc = DidDoc::new(&did, verkey, endpoint, routing_keys);

        Self { did, doc }
    }
}

/// A request or response whose proof of DID ownership checked out
#[derive(Clone, Debug, PartialEq)]
pub struct Verified {
    pub thread_id: String,
    /// Id of the verified message
    pub message_id: String,
    pub version: Version,
    pub label: String,
    /// The peer, with normalized DID and its document
    pub peer: Identity,
}

/// The peer's DID and document after checking that the document's keys are
/// the DID's own, and that `signer` (and the envelope sender, when
/// authenticated) belong to it
fn authenticated_peer(
    did: &str,
    doc: &DidDoc,
    signer: Option<&PublicVerificationKeyData>,
    sender: Option<&PublicVerificationKeyData>,
) -> Result<Identity, Error> {
    let doc = did::resolve(did, Some(doc))?;
    let verkey = did::verify_binding(did, &doc)?;

    for key in signer.into_iter().chain(sender) {
        if !doc.contains_key(key) {
            return Err(CryptoError::SignatureInvalid(key.to_base58()).into());
        }
    }

    Ok(Identity::new(verkey).with_did(did, Some(doc)))
}

pub fn build_request(
    task: &HandshakeTask,
    pipe: &SecurePipe,
    own: &OwnDid,
) -> Result<Message, Error> {
    match task.version {
        Version::Legacy => Ok(legacy::build_request(task, own)),
        Version::Current => current::build_request(task, pipe, own),
    }
}

/// Verify a request; `sender` is the authenticated envelope sender, if any
pub fn verify_request(
    message: &Message,
    sender: Option<&PublicVerificationKeyData>,
    crypto: &dyn Crypto,
) -> Result<Verified, Error> {
    match message {
        Message::ConnectionRequest(request) => legacy::verify_request(request, sender),
        Message::ExchangeRequest(request) => current::verify_request(request, sender, crypto),
        other => Err(Error::UnexpectedMessage(other.message_type().to_string())),
    }
}

pub fn build_response(
    task: &HandshakeTask,
    pipe: &SecurePipe,
    own: &OwnDid,
) -> Result<Message, Error> {
    match task.version {
        Version::Legacy => legacy::build_response(task, pipe, own),
        Version::Current => current::build_response(task, pipe, own),
    }
}

pub fn verify_response(
    message: &Message,
    sender: Option<&PublicVerificationKeyData>,
    crypto: &dyn Crypto,
    freshness: &Freshness,
) -> Result<Verified, Error> {
    match message {
        Message::ConnectionResponse(response) => {
            legacy::verify_response(response, sender, freshness)
        }
        Message::ExchangeResponse(response) => current::verify_response(response, sender, crypto),
        other => Err(Error::UnexpectedMessage(other.message_type().to_string())),
    }
}

/// ACK (legacy) or Complete (current)
pub fn build_complete(task: &HandshakeTask) -> Message {
    match task.version {
        Version::Legacy => legacy::build_ack(task),
        Version::Current => current::build_complete(task),
    }
}
