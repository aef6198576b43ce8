use serde::{Deserialize, Serialize};

use super::{Header, MessageType};
use crate::{did::DidDoc, signature::ConnectionSignature};

/// The `connection` object of the legacy handshake: a DID and its document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "DID")]
    pub did: String,
    #[serde(rename = "DIDDoc")]
    pub did_doc: DidDoc,
}

/// Legacy request: the invitee's DID with its document inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub label: String,
    pub connection: Connection,
}

/// Legacy response: the inviter's connection, signed with its new pairwise key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResponse {
    #[serde(flatten)]
    pub header: Header,
    #[serde(rename = "connection~sig")]
    pub connection_sig: ConnectionSignature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(flatten)]
    pub header: Header,
    pub status: String,
}

impl ConnectionRequest {
    pub fn new(thid: &str, label: &str, connection: Connection) -> Self {
        Self {
            header: Header::new(MessageType::ConnectionRequest).with_thread(thid),
            label: label.to_string(),
            connection,
        }
    }
}

impl ConnectionResponse {
    pub fn new(thid: &str, connection_sig: ConnectionSignature) -> Self {
        Self {
            header: Header::new(MessageType::ConnectionResponse).with_thread(thid),
            connection_sig,
        }
    }
}

impl Ack {
    pub fn new(thid: &str) -> Self {
        Self {
            header: Header::new(MessageType::ConnectionAck).with_thread(thid),
            status: "OK".to_string(),
        }
    }
}
