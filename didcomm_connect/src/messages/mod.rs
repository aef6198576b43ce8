use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, forward::Forward, handshake::Version};

mod connection;
mod exchange;
mod header;
mod invitation;
mod problem;

pub use connection::{Ack, Connection, ConnectionRequest, ConnectionResponse};
pub use exchange::{Complete, ExchangeRequest, ExchangeResponse};
pub use header::{Header, Thread};
pub use invitation::{Invitation, InvitationTarget, OutOfBandInvitation, OutOfBandService};
pub use problem::{ProblemCode, ProblemReport};

/// Prefix of message types on output
pub const DIDCOMM_PREFIX: &str = "https://didcomm.org/";

/// Legacy prefix still emitted by older agents
pub const LEGACY_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/";

/// Strip whichever known prefix a message type URI carries
pub(crate) fn strip_type_prefix(uri: &str) -> &str {
    uri.strip_prefix(DIDCOMM_PREFIX)
        .or_else(|| uri.strip_prefix(LEGACY_PREFIX))
        .unwrap_or(uri)
}

/// The closed set of message types understood by the connection core
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Invitation,
    ConnectionRequest,
    ConnectionResponse,
    ConnectionAck,
    ConnectionProblemReport,
    OutOfBandInvitation,
    ExchangeRequest,
    ExchangeResponse,
    ExchangeComplete,
    ExchangeProblemReport,
    Forward,
}

impl MessageType {
    /// Protocol path without prefix, e.g. `connections/1.0/request`
    pub fn path(&self) -> &'static str {
        match self {
            MessageType::Invitation => "connections/1.0/invitation",
            MessageType::ConnectionRequest => "connections/1.0/request",
            MessageType::ConnectionResponse => "connections/1.0/response",
            MessageType::ConnectionAck => "notification/1.0/ack",
            MessageType::ConnectionProblemReport => "connections/1.0/problem_report",
            MessageType::OutOfBandInvitation => "out-of-band/1.1/invitation",
            MessageType::ExchangeRequest => "didexchange/1.0/request",
            MessageType::ExchangeResponse => "didexchange/1.0/response",
            MessageType::ExchangeComplete => "didexchange/1.0/complete",
            MessageType::ExchangeProblemReport => "didexchange/1.0/problem_report",
            MessageType::Forward => "routing/1.0/forward",
        }
    }

    /// Parse a type URI carrying either known prefix
    pub fn parse(uri: &str) -> Option<Self> {
        let ty = match strip_type_prefix(uri) {
            "connections/1.0/invitation" => MessageType::Invitation,
            "connections/1.0/request" => MessageType::ConnectionRequest,
            "connections/1.0/response" => MessageType::ConnectionResponse,
            "notification/1.0/ack" | "connections/1.0/ack" => MessageType::ConnectionAck,
            "connections/1.0/problem_report" => MessageType::ConnectionProblemReport,
            "out-of-band/1.0/invitation" | "out-of-band/1.1/invitation" => {
                MessageType::OutOfBandInvitation
            }
            "didexchange/1.0/request" => MessageType::ExchangeRequest,
            "didexchange/1.0/response" => MessageType::ExchangeResponse,
            "didexchange/1.0/complete" => MessageType::ExchangeComplete,
            "didexchange/1.0/problem_report" => MessageType::ExchangeProblemReport,
            "routing/1.0/forward" => MessageType::Forward,
            _ => return None,
        };

        Some(ty)
    }

    /// Handshake version the type belongs to, if any
    pub fn version(&self) -> Option<Version> {
        match self {
            MessageType::Invitation
            | MessageType::ConnectionRequest
            | MessageType::ConnectionResponse
            | MessageType::ConnectionAck
            | MessageType::ConnectionProblemReport => Some(Version::Legacy),
            MessageType::OutOfBandInvitation
            | MessageType::ExchangeRequest
            | MessageType::ExchangeResponse
            | MessageType::ExchangeComplete
            | MessageType::ExchangeProblemReport => Some(Version::Current),
            MessageType::Forward => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DIDCOMM_PREFIX}{}", self.path())
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;

        MessageType::parse(&uri)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown message type '{uri}'")))
    }
}

// ANCHOR: message-mbBook
/// Every message the connection core sends or receives
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Invitation(Invitation),
    OutOfBandInvitation(OutOfBandInvitation),
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    Ack(Ack),
    ExchangeRequest(ExchangeRequest),
    ExchangeResponse(ExchangeResponse),
    Complete(Complete),
    ProblemReport(ProblemReport),
    Forward(Forward),
}
// ANCHOR_END: message-mbBook

impl Message {
    /// Decode a plaintext message, selecting the variant from its `@type`
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        let uri = value
            .get("@type")
            .and_then(|t| t.as_str())
            .ok_or(Error::MissingField("@type"))?;

        let message_type =
            MessageType::parse(uri).ok_or_else(|| Error::UnexpectedMessage(uri.to_string()))?;

        let mut message = match message_type {
            MessageType::Invitation => Message::Invitation(serde_json::from_value(value)?),
            MessageType::OutOfBandInvitation => {
                Message::OutOfBandInvitation(serde_json::from_value(value)?)
            }
            MessageType::ConnectionRequest => {
                Message::ConnectionRequest(serde_json::from_value(value)?)
            }
            MessageType::ConnectionResponse => {
                Message::ConnectionResponse(serde_json::from_value(value)?)
            }
            MessageType::ConnectionAck => Message::Ack(serde_json::from_value(value)?),
            MessageType::ExchangeRequest => Message::ExchangeRequest(serde_json::from_value(value)?),
            MessageType::ExchangeResponse => {
                Message::ExchangeResponse(serde_json::from_value(value)?)
            }
            MessageType::ExchangeComplete => Message::Complete(serde_json::from_value(value)?),
            MessageType::ConnectionProblemReport | MessageType::ExchangeProblemReport => {
                Message::ProblemReport(serde_json::from_value(value)?)
            }
            MessageType::Forward => Message::Forward(serde_json::from_value(value)?),
        };
        message.header_mut().retain_decorators();

        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let encoded = match self {
            Message::Invitation(m) => serde_json::to_vec(m),
            Message::OutOfBandInvitation(m) => serde_json::to_vec(m),
            Message::ConnectionRequest(m) => serde_json::to_vec(m),
            Message::ConnectionResponse(m) => serde_json::to_vec(m),
            Message::Ack(m) => serde_json::to_vec(m),
            Message::ExchangeRequest(m) => serde_json::to_vec(m),
            Message::ExchangeResponse(m) => serde_json::to_vec(m),
            Message::Complete(m) => serde_json::to_vec(m),
            Message::ProblemReport(m) => serde_json::to_vec(m),
            Message::Forward(m) => serde_json::to_vec(m),
        };

        Ok(encoded?)
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Invitation(m) => &m.header,
            Message::OutOfBandInvitation(m) => &m.header,
            Message::ConnectionRequest(m) => &m.header,
            Message::ConnectionResponse(m) => &m.header,
            Message::Ack(m) => &m.header,
            Message::ExchangeRequest(m) => &m.header,
            Message::ExchangeResponse(m) => &m.header,
            Message::Complete(m) => &m.header,
            Message::ProblemReport(m) => &m.header,
            Message::Forward(m) => &m.header,
        }
    }

    fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Invitation(m) => &mut m.header,
            Message::OutOfBandInvitation(m) => &mut m.header,
            Message::ConnectionRequest(m) => &mut m.header,
            Message::ConnectionResponse(m) => &mut m.header,
            Message::Ack(m) => &mut m.header,
            Message::ExchangeRequest(m) => &mut m.header,
            Message::ExchangeResponse(m) => &mut m.header,
            Message::Complete(m) => &mut m.header,
            Message::ProblemReport(m) => &mut m.header,
            Message::Forward(m) => &mut m.header,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header().message_type
    }

    pub fn id(&self) -> &str {
        &self.header().id
    }

    pub fn thread_id(&self) -> &str {
        self.header().thread_id()
    }

    /// Parent thread; only the current protocol carries one
    pub fn parent_thread_id(&self) -> Result<Option<&str>, Error> {
        match self.message_type().version() {
            Some(Version::Current) => Ok(self.header().parent_thread_id()),
            _ => Err(Error::Unsupported("parent thread on legacy connection messages")),
        }
    }

    /// The invitation target, for either invitation format
    pub fn invitation_target(&self) -> Result<InvitationTarget, Error> {
        match self {
            Message::Invitation(invitation) => invitation.target(),
            Message::OutOfBandInvitation(invitation) => invitation.target(),
            other => Err(Error::UnexpectedMessage(other.message_type().to_string())),
        }
    }
}
