use tracing::debug;

use super::{HandshakeTask, OwnDid, Verified, Version, authenticated_peer};
use crate::{
    Error,
    attachment::{sign_attachment, verify_attachment},
    crypto::Crypto,
    definitions::PublicVerificationKeyData,
    messages::{Complete, ExchangeRequest, ExchangeResponse, Message},
    pipe::SecurePipe,
};

pub(super) fn build_request(
    task: &HandshakeTask,
    pipe: &SecurePipe,
    own: &OwnDid,
) -> Result<Message, Error> {
    Ok(Message::ExchangeRequest(ExchangeRequest::new(
        &task.nonce,
        &task.thread_id,
        &task.label,
        &own.did,
        sign_attachment(pipe, &own.doc)?,
    )))
}

pub(super) fn verify_request(
    request: &ExchangeRequest,
    sender: Option<&PublicVerificationKeyData>,
    crypto: &dyn Crypto,
) -> Result<Verified, Error> {
    if request.did.is_empty() {
        return Err(Error::MissingField("did"));
    }

    let attachment = request
        .did_doc_attach
        .as_ref()
        .ok_or(Error::MissingField("did_doc~attach"))?;
    let (doc, signer) = verify_attachment(attachment, crypto)?;

    let peer = authenticated_peer(&request.did, &doc, Some(&signer), sender)?;
    debug!("request from {} verified", request.did);

    Ok(Verified {
        thread_id: request.header.thread_id().to_string(),
        message_id: request.header.id.clone(),
        version: Version::Current,
        label: request.label.clone(),
        peer,
    })
}

pub(super) fn build_response(
    task: &HandshakeTask,
    pipe: &SecurePipe,
    own: &OwnDid,
) -> Result<Message, Error> {
    Ok(Message::ExchangeResponse(ExchangeResponse::new(
        &task.nonce,
        &own.did,
        sign_attachment(pipe, &own.doc)?,
    )))
}

pub(super) fn verify_response(
    response: &ExchangeResponse,
    sender: Option<&PublicVerificationKeyData>,
    crypto: &dyn Crypto,
) -> Result<Verified, Error> {
    if response.did.is_empty() {
        return Err(Error::MissingField("did"));
    }

    let attachment = response
        .did_doc_attach
        .as_ref()
        .ok_or(Error::MissingField("did_doc~attach"))?;
    let (doc, signer) = verify_attachment(attachment, crypto)?;

    let peer = authenticated_peer(&response.did, &doc, Some(&signer), sender)?;
    debug!("response from {} verified", response.did);

    Ok(Verified {
        thread_id: response.header.thread_id().to_string(),
        message_id: response.header.id.clone(),
        version: Version::Current,
        label: String::new(),
        peer,
    })
}

pub(super) fn build_complete(task: &HandshakeTask) -> Message {
    Message::Complete(Complete::new(&task.nonce, Some(&task.thread_id)))
}
