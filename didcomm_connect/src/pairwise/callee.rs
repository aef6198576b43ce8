use tracing::{info, warn};

use super::{Outcome, PairwiseAgent, log_transition};
use crate::{
    Error,
    crypto::CryptoError,
    handshake::{
        self, HandshakeEvent, HandshakeMachine, HandshakeTask, Role, Step, Transition, Version,
    },
    messages::{Invitation, Message, OutOfBandInvitation},
    packer::Envelope,
    state::{PairwiseRepresentative, Party, StateKey},
};

/// The responding side of a handshake
pub struct Callee<'a> {
    agent: &'a PairwiseAgent,
}

fn advance(
    record: &mut PairwiseRepresentative,
    event: HandshakeEvent,
) -> Result<Transition, Error> {
    let transition = HandshakeMachine::transition(Role::Callee, Some(record.state), event)?;

    if let Transition::Advance(next) = transition {
        log_transition(&record.state_key, Some(record.state), next);
        record.state = next;
    }

    Ok(transition)
}

impl<'a> Callee<'a> {
    pub(super) fn new(agent: &'a PairwiseAgent) -> Self {
        Self { agent }
    }

    /// Issue an invitation in the configured handshake version
    pub fn invite(&self) -> Result<Message, Error> {
        self.invite_with_id(&uuid::Uuid::new_v4().to_string())
    }

    /// Issue an invitation with a given id, which becomes the thread id of the handshake
    pub fn invite_with_id(&self, id: &str) -> Result<Message, Error> {
        let config = &self.agent.config;
        let key = self.agent.packager.kms().create_key()?;

        let mut invitation = match config.version {
            Version::Legacy => Message::Invitation(Invitation::new(
                &config.label,
                &key.public_key,
                &config.routing_keys,
                config.endpoint.clone(),
            )),
            Version::Current => Message::OutOfBandInvitation(OutOfBandInvitation::new(
                &config.label,
                &key.public_key,
                &config.routing_keys,
                config.endpoint.clone(),
            )),
        };

        match &mut invitation {
            Message::Invitation(m) => m.header.id = id.to_string(),
            Message::OutOfBandInvitation(m) => m.header.id = id.to_string(),
            _ => {}
        }

        self.agent.tracker.index_invitation(&key.public_key, id)?;
        info!("issued invitation {id}");

        Ok(invitation)
    }

    /// Handle a request sent in answer to one of our invitations
    pub fn handle_request(&self, packed: &[u8]) -> Result<Outcome, Error> {
        let (message, envelope) = self.agent.open(packed)?;

        self.process_request(&message, &envelope)
    }

    /// Handle the final ACK or Complete
    pub fn handle_complete(&self, packed: &[u8]) -> Result<Outcome, Error> {
        let (message, envelope) = self.agent.open(packed)?;

        self.process_complete(&message, &envelope)
    }

    pub(super) fn process_request(
        &self,
        message: &Message,
        envelope: &Envelope,
    ) -> Result<Outcome, Error> {
        let agent = self.agent;
        let config = &agent.config;

        let invitation_id = envelope
            .to_keys
            .first()
            .map(|key| agent.tracker.invitation_by_key(key))
            .transpose()?
            .flatten()
            .ok_or_else(|| Error::MissingPendingState(message.thread_id().to_string()))?;

        let verified =
            handshake::verify_request(message, envelope.from_key.as_ref(), agent.packager.crypto())?;
        HandshakeMachine::check_thread(&invitation_id, &verified.thread_id)?;

        let peer = verified.peer;
        let peer_did = peer.did.clone().ok_or(Error::MissingField("did"))?;
        let peer_doc = peer.did_doc.clone().ok_or(Error::MissingField("DIDDoc"))?;

        if let Some(existing) = agent.tracker.by_thread(&verified.thread_id, &peer_did)?
            && let Some(record) = agent.tracker.get(&existing)?
            && HandshakeMachine::transition(
                Role::Callee,
                Some(record.state),
                HandshakeEvent::Receive(Step::Request),
            )? == Transition::Duplicate
        {
            warn!("{existing}: ignoring re-delivered request");
            return Ok(Outcome::Duplicate {
                state_key: existing,
            });
        }

        let Transition::Advance(received) = HandshakeMachine::transition(
            Role::Callee,
            None,
            HandshakeEvent::Receive(Step::Request),
        )?
        else {
            return Err(Error::Internal);
        };

        let (own, own_key) = agent.create_own_did()?;
        let pipe = agent.pipe(&own_key, &own.did, Some(peer.clone()));

        let mut task = HandshakeTask {
            nonce: verified.message_id.clone(),
            thread_id: verified.thread_id.clone(),
            role: Role::Callee,
            label: config.label.clone(),
            endpoint: pipe.peer_endpoint()?,
            did_method: config.did_method,
            version: verified.version,
        };

        let (state_key, response) = task.with_thread_nonce(|t| -> Result<_, Error> {
            Ok((
                StateKey::new(&own.did, &t.nonce),
                handshake::build_response(t, &pipe, &own)?,
            ))
        })?;

        let mut record = PairwiseRepresentative {
            state_key: state_key.clone(),
            relationship_name: verified.label.clone(),
            peer_label: verified.label,
            caller: Party {
                did: peer_did.clone(),
                verkey: Some(peer.verkey),
                endpoint: peer_doc.endpoint().cloned(),
                is_mine: false,
            },
            callee: Party {
                did: state_key.owner_did.clone(),
                verkey: Some(own_key),
                endpoint: Some(config.endpoint.clone()),
                is_mine: true,
            },
            version: task.version,
            state: received,
        };

        // the record is stored only once the response is packed
        let outbound = agent.pack(&pipe, &response)?;

        log_transition(&state_key, None, received);
        agent.tracker.put_peer_doc(&state_key, &peer_doc)?;
        agent
            .tracker
            .index_thread(&task.thread_id, &peer_did, &state_key)?;
        agent.tracker.put(&record)?;

        advance(&mut record, HandshakeEvent::Build(Step::Response))?;
        agent.tracker.put(&record)?;

        advance(&mut record, HandshakeEvent::Send(Step::Response))?;
        agent.tracker.put(&record)?;

        Ok(Outcome::Reply {
            state_key,
            outbound,
        })
    }

    pub(super) fn process_complete(
        &self,
        message: &Message,
        envelope: &Envelope,
    ) -> Result<Outcome, Error> {
        let agent = self.agent;
        let thread_id = message.thread_id();

        let own_did = agent.recipient_did(envelope, thread_id)?;
        let state_key = StateKey::new(&own_did, thread_id);
        let mut record = agent
            .tracker
            .get(&state_key)?
            .ok_or_else(|| Error::MissingPendingState(state_key.to_string()))?;

        if record.role() != Role::Callee || message.message_type().version() != Some(record.version)
        {
            return Err(Error::UnexpectedMessage(message.message_type().to_string()));
        }

        if HandshakeMachine::transition(
            Role::Callee,
            Some(record.state),
            HandshakeEvent::Receive(Step::Complete),
        )? == Transition::Duplicate
        {
            warn!("{state_key}: ignoring re-delivered completion");
            return Ok(Outcome::Duplicate { state_key });
        }

        // the completion carries no proof of its own; the envelope must come from the peer
        match (envelope.from_key, record.theirs().verkey) {
            (Some(sender), Some(peer)) if sender == peer => {}
            (sender, _) => {
                return Err(CryptoError::SignatureInvalid(
                    sender.map(|k| k.to_base58()).unwrap_or_default(),
                )
                .into());
            }
        }

        advance(&mut record, HandshakeEvent::Receive(Step::Complete))?;
        agent.tracker.put(&record)?;
        info!("{state_key}: connection with {} established", record.theirs().did);

        Ok(Outcome::Completed { state_key })
    }
}
