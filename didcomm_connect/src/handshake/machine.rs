use serde::{Deserialize, Serialize};

use super::Role;

/// Coarse progress of one side of a handshake
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    /// Our message is built and handed to transport
    Sending,
    /// Our message is sent, the peer's answer is pending
    Waiting,
    /// A verified message of the peer is in
    Received,
    /// The exchange is complete
    ReadyAck,
}

/// The three messages following the invitation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Request,
    Response,
    Complete,
}

/// Events that move a side of the handshake forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// We built the message of this step.
    Build(Step),
    /// Transport took the message of this step.
    Send(Step),
    /// We verified the peer's message of this step.
    Receive(Step),
}

/// Outcome of a valid event
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Advance(HandshakeState),
    /// Re-delivery of a step already processed; the state stays as it is
    Duplicate,
}

/// Errors that can occur during state transitions.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("Invalid {role:?} transition from {from:?} with event {event:?}")]
    InvalidTransition {
        role: Role,
        from: Option<HandshakeState>,
        event: HandshakeEvent,
    },
    #[error("Thread ID mismatch: expected {expected}, got {got}")]
    ThreadIdMismatch { expected: String, got: String },
}

/// The handshake state machine, per role
pub struct HandshakeMachine;

impl HandshakeMachine {
    /// Transition from `current` (`None` before the first step) on `event`
    pub fn transition(
        role: Role,
        current: Option<HandshakeState>,
        event: HandshakeEvent,
    ) -> Result<Transition, StateError> {
        use HandshakeEvent::*;
        use HandshakeState::*;
        use Step::*;

        let next = match (role, current, event) {
            // --- Caller ---
            (Role::Caller, None, Build(Request)) => Transition::Advance(Sending),
            (Role::Caller, Some(Sending), Send(Request)) => Transition::Advance(Waiting),
            (Role::Caller, Some(Waiting), Receive(Response)) => Transition::Advance(Received),
            (Role::Caller, Some(Received), Send(Complete)) => Transition::Advance(ReadyAck),
            // Idempotency: repeating the step that got us here
            (Role::Caller, Some(Sending), Build(Request))
            | (Role::Caller, Some(Waiting), Send(Request))
            | (Role::Caller, Some(Received), Receive(Response))
            | (Role::Caller, Some(ReadyAck), Send(Complete)) => Transition::Duplicate,
            // Re-delivered response after we completed
            (Role::Caller, Some(ReadyAck), Receive(Response)) => Transition::Duplicate,

            // --- Callee ---
            (Role::Callee, None, Receive(Request)) => Transition::Advance(Received),
            (Role::Callee, Some(Received), Build(Response)) => Transition::Advance(Sending),
            (Role::Callee, Some(Sending), Send(Response)) => Transition::Advance(Waiting),
            (Role::Callee, Some(Waiting), Receive(Complete)) => Transition::Advance(ReadyAck),
            // Idempotency: repeating the step that got us here
            (Role::Callee, Some(Received), Receive(Request))
            | (Role::Callee, Some(Sending), Build(Response))
            | (Role::Callee, Some(Waiting), Send(Response))
            | (Role::Callee, Some(ReadyAck), Receive(Complete)) => Transition::Duplicate,
            // Re-delivered request after we answered it
            (Role::Callee, Some(Sending | Waiting | ReadyAck), Receive(Request)) => {
                Transition::Duplicate
            }

            // --- Invalid Transitions ---
            (role, from, event) => {
                return Err(StateError::InvalidTransition { role, from, event });
            }
        };

        Ok(next)
    }

    /// Apply a sequence of events, failing on the first invalid one
    pub fn run(
        role: Role,
        mut current: Option<HandshakeState>,
        events: &[HandshakeEvent],
    ) -> Result<Option<HandshakeState>, StateError> {
        for event in events {
            if let Transition::Advance(next) = Self::transition(role, current, *event)? {
                current = Some(next);
            }
        }

        Ok(current)
    }

    /// Check that a message belongs to the handshake we are tracking
    pub fn check_thread(expected: &str, got: &str) -> Result<(), StateError> {
        if expected == got {
            Ok(())
        } else {
            Err(StateError::ThreadIdMismatch {
                expected: expected.to_string(),
                got: got.to_string(),
            })
        }
    }
}
