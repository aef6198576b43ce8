use tracing::warn;

use super::{Outbound, Outcome, PairwiseAgent, log_transition};
use crate::{
    Error,
    handshake::{
        self, HandshakeEvent, HandshakeMachine, HandshakeState, HandshakeTask, Role, Step,
        Transition,
    },
    messages::{InvitationTarget, Message},
    packer::Envelope,
    pipe::Identity,
    state::{PairwiseRepresentative, Party, StateKey},
};

/// The initiating side of a handshake
pub struct Caller<'a> {
    agent: &'a PairwiseAgent,
}

fn advance(
    record: &mut PairwiseRepresentative,
    event: HandshakeEvent,
) -> Result<Transition, Error> {
    let transition = HandshakeMachine::transition(Role::Caller, Some(record.state), event)?;

    if let Transition::Advance(next) = transition {
        log_transition(&record.state_key, Some(record.state), next);
        record.state = next;
    }

    Ok(transition)
}

impl<'a> Caller<'a> {
    pub(super) fn new(agent: &'a PairwiseAgent) -> Self {
        Self { agent }
    }

    /// Accept an invitation: create our DID and send the request
    ///
    /// The returned key identifies the relationship as seen from our side.
    pub fn connect(&self, invitation: &InvitationTarget) -> Result<(StateKey, Outbound), Error> {
        let agent = self.agent;
        let config = &agent.config;

        let Transition::Advance(initial) =
            HandshakeMachine::transition(Role::Caller, None, HandshakeEvent::Build(Step::Request))?
        else {
            return Err(Error::Internal);
        };

        let (own, own_key) = agent.create_own_did()?;
        let pipe = agent.pipe(&own_key, &own.did, Some(Identity::from_invitation(invitation)?));

        let task = HandshakeTask {
            nonce: invitation.id.clone(),
            thread_id: invitation.id.clone(),
            role: Role::Caller,
            label: config.label.clone(),
            endpoint: pipe.peer_endpoint()?,
            did_method: config.did_method,
            version: invitation.version,
        };

        let state_key = StateKey::new(&own.did, &task.nonce);
        let request = handshake::build_request(&task, &pipe, &own)?;

        let mut record = PairwiseRepresentative {
            state_key: state_key.clone(),
            relationship_name: invitation.label.clone(),
            peer_label: invitation.label.clone(),
            caller: Party {
                did: state_key.owner_did.clone(),
                verkey: Some(own_key),
                endpoint: Some(config.endpoint.clone()),
                is_mine: true,
            },
            callee: Party::default(),
            version: task.version,
            state: initial,
        };
        let outbound = agent.pack(&pipe, &request)?;

        log_transition(&state_key, None, initial);
        agent.tracker.put(&record)?;

        advance(&mut record, HandshakeEvent::Send(Step::Request))?;
        agent.tracker.put(&record)?;

        Ok((state_key, outbound))
    }

    /// Handle the response to a request we sent
    pub fn handle_response(&self, packed: &[u8]) -> Result<Outcome, Error> {
        let (message, envelope) = self.agent.open(packed)?;

        self.process_response(&message, &envelope)
    }

    pub(super) fn process_response(
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

        if record.role() != Role::Caller || message.message_type().version() != Some(record.version)
        {
            return Err(Error::UnexpectedMessage(message.message_type().to_string()));
        }

        if HandshakeMachine::transition(
            Role::Caller,
            Some(record.state),
            HandshakeEvent::Receive(Step::Response),
        )? == Transition::Duplicate
        {
            warn!("{state_key}: ignoring re-delivered response");
            return Ok(Outcome::Duplicate { state_key });
        }

        let verified = handshake::verify_response(
            message,
            envelope.from_key.as_ref(),
            agent.packager.crypto(),
            &agent.config.freshness(),
        )?;
        HandshakeMachine::check_thread(&state_key.nonce, &verified.thread_id)?;

        let peer = verified.peer;
        let peer_did = peer.did.clone().ok_or(Error::MissingField("did"))?;
        let peer_doc = peer.did_doc.clone().ok_or(Error::MissingField("DIDDoc"))?;

        *record.theirs_mut() = Party {
            did: peer_did.clone(),
            verkey: Some(peer.verkey),
            endpoint: peer_doc.endpoint().cloned(),
            is_mine: false,
        };
        advance(&mut record, HandshakeEvent::Receive(Step::Response))?;

        let own_key = record.mine().verkey.ok_or(Error::MissingField("verkey"))?;
        let pipe = agent.pipe(&own_key, &own_did, Some(peer));
        let task = HandshakeTask {
            nonce: state_key.nonce.clone(),
            thread_id: state_key.nonce.clone(),
            role: Role::Caller,
            label: agent.config.label.clone(),
            endpoint: pipe.peer_endpoint()?,
            did_method: agent.config.did_method,
            version: record.version,
        };
        let outbound = agent.pack(&pipe, &handshake::build_complete(&task))?;

        agent.tracker.put_peer_doc(&state_key, &peer_doc)?;
        agent.tracker.index_thread(thread_id, &peer_did, &state_key)?;
        agent.tracker.put(&record)?;

        advance(&mut record, HandshakeEvent::Send(Step::Complete))?;
        agent.tracker.put(&record)?;
        debug_assert_eq!(record.state, HandshakeState::ReadyAck);

        Ok(Outcome::Reply {
            state_key,
            outbound,
        })
    }
}
