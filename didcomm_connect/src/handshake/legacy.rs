use tracing::debug;

use super::{HandshakeTask, OwnDid, Verified, Version, authenticated_peer};
use crate::{
    Error,
    definitions::PublicVerificationKeyData,
    messages::{Ack, Connection, ConnectionRequest, ConnectionResponse, Message},
    pipe::SecurePipe,
    signature::{self, Freshness},
};

fn connection(own: &OwnDid) -> Connection {
    Connection {
        did: own.did.clone(),
        did_doc: own.doc.clone(),
    }
}

pub(super) fn build_request(task: &HandshakeTask, own: &OwnDid) -> Message {
    Message::ConnectionRequest(ConnectionRequest::new(
        &task.nonce,
        &task.label,
        connection(own),
    ))
}

pub(super) fn verify_request(
    request: &ConnectionRequest,
    sender: Option<&PublicVerificationKeyData>,
) -> Result<Verified, Error> {
    let Connection { did, did_doc } = &request.connection;
    if did.is_empty() {
        return Err(Error::MissingField("connection.DID"));
    }

    let peer = authenticated_peer(did, did_doc, None, sender)?;
    debug!("legacy request from {did} verified");

    Ok(Verified {
        thread_id: request.header.thread_id().to_string(),
        message_id: request.header.id.clone(),
        version: Version::Legacy,
        label: request.label.clone(),
        peer,
    })
}

pub(super) fn build_response(
    task: &HandshakeTask,
    pipe: &SecurePipe,
    own: &OwnDid,
) -> Result<Message, Error> {
    let signature = signature::sign_connection(pipe, &connection(own))?;

    Ok(Message::ConnectionResponse(ConnectionResponse::new(
        &task.nonce,
        signature,
    )))
}

/// The connection signature is checked against its embedded signer, which
/// must then be a key of the signed DID document
pub(super) fn verify_response(
    response: &ConnectionResponse,
    sender: Option<&PublicVerificationKeyData>,
    freshness: &Freshness,
) -> Result<Verified, Error> {
    let (connection, signer) =
        signature::verify_connection(&SecurePipe::null(), &response.connection_sig, freshness)?;

    let peer = authenticated_peer(
        &connection.did,
        &connection.did_doc,
        Some(&signer),
        sender,
    )?;
    debug!("legacy response from {} verified", connection.did);

    Ok(Verified {
        thread_id: response.header.thread_id().to_string(),
        message_id: response.header.id.clone(),
        version: Version::Legacy,
        label: String::new(),
        peer,
    })
}

pub(super) fn build_ack(task: &HandshakeTask) -> Message {
    Message::Ack(Ack::new(&task.nonce))
}
