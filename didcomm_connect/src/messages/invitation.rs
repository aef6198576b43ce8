use serde::{Deserialize, Serialize};
use url::Url;

use super::{Header, MessageType, strip_type_prefix};
use crate::{
    Error,
    crypto::CryptoError,
    definitions::PublicVerificationKeyData,
    did::{did_key_to_verkey, verkey_to_did_key},
    handshake::Version,
};

const DIDEXCHANGE_PROTOCOL: &str = "https://didcomm.org/didexchange/1.0";
const CONNECTIONS_PROTOCOL: &str = "https://didcomm.org/connections/1.0";
const INLINE_SERVICE_TYPE: &str = "did-communication";

/// Legacy `connections/1.0` invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "recipientKeys")]
    pub recipient_keys: Vec<String>,
    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: Url,
}

/// Out-of-band invitation offering the current handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfBandInvitation {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub handshake_protocols: Vec<String>,
    pub services: Vec<OutOfBandService>,
}

/// Either an inline service block or a reference to a public DID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutOfBandService {
    Inline {
        id: String,
        #[serde(rename = "type")]
        service_type: String,
        #[serde(rename = "recipientKeys")]
        recipient_keys: Vec<String>,
        #[serde(rename = "routingKeys", default)]
        routing_keys: Vec<String>,
        #[serde(rename = "serviceEndpoint")]
        service_endpoint: Url,
    },
    Did(String),
}

/// What an invitation tells the invitee: where and how to send its request
#[derive(Debug, Clone, PartialEq)]
pub struct InvitationTarget {
    /// Invitation id, which becomes the thread id of the handshake
    pub id: String,
    pub label: String,
    pub recipient_keys: Vec<PublicVerificationKeyData>,
    /// First hop first
    pub routing_keys: Vec<PublicVerificationKeyData>,
    pub endpoint: Url,
    pub version: Version,
}

/// Accept a key given either as `did:key` or as raw base58
pub(crate) fn parse_key(key: &str) -> Result<PublicVerificationKeyData, Error> {
    did_key_to_verkey(key)
        .or_else(|| PublicVerificationKeyData::from_base58(key))
        .ok_or_else(|| CryptoError::InvalidKey(key.to_string()).into())
}

fn parse_keys(keys: &[String]) -> Result<Vec<PublicVerificationKeyData>, Error> {
    keys.iter().map(|k| parse_key(k)).collect()
}

impl Invitation {
    pub fn new(
        label: &str,
        recipient_key: &PublicVerificationKeyData,
        routing_keys: &[PublicVerificationKeyData],
        service_endpoint: Url,
    ) -> Self {
        Self {
            header: Header::new(MessageType::Invitation),
            label: label.to_string(),
            recipient_keys: vec![recipient_key.to_base58()],
            routing_keys: routing_keys.iter().map(|k| k.to_base58()).collect(),
            service_endpoint,
        }
    }

    pub fn target(&self) -> Result<InvitationTarget, Error> {
        let recipient_keys = parse_keys(&self.recipient_keys)?;
        if recipient_keys.is_empty() {
            return Err(Error::MissingField("recipientKeys"));
        }

        Ok(InvitationTarget {
            id: self.header.id.clone(),
            label: self.label.clone(),
            recipient_keys,
            routing_keys: parse_keys(&self.routing_keys)?,
            endpoint: self.service_endpoint.clone(),
            version: Version::Legacy,
        })
    }
}

impl OutOfBandInvitation {
    pub fn new(
        label: &str,
        recipient_key: &PublicVerificationKeyData,
        routing_keys: &[PublicVerificationKeyData],
        service_endpoint: Url,
    ) -> Self {
        Self {
            header: Header::new(MessageType::OutOfBandInvitation),
            label: label.to_string(),
            handshake_protocols: vec![DIDEXCHANGE_PROTOCOL.to_string()],
            services: vec![OutOfBandService::Inline {
                id: "#inline".to_string(),
                service_type: INLINE_SERVICE_TYPE.to_string(),
                recipient_keys: vec![verkey_to_did_key(recipient_key)],
                routing_keys: routing_keys.iter().map(verkey_to_did_key).collect(),
                service_endpoint,
            }],
        }
    }

    /// Handshake version to answer with; the current protocol wins when both are offered
    fn version(&self) -> Result<Version, Error> {
        let offered = |protocol: &str| {
            self.handshake_protocols
                .iter()
                .any(|p| strip_type_prefix(p) == strip_type_prefix(protocol))
        };

        if offered(DIDEXCHANGE_PROTOCOL) {
            Ok(Version::Current)
        } else if offered(CONNECTIONS_PROTOCOL) {
            Ok(Version::Legacy)
        } else {
            Err(Error::Unsupported("out-of-band invitation without a known handshake"))
        }
    }

    pub fn target(&self) -> Result<InvitationTarget, Error> {
        let version = self.version()?;

        let (recipient_keys, routing_keys, endpoint) = self
            .services
            .iter()
            .find_map(|service| match service {
                OutOfBandService::Inline {
                    recipient_keys,
                    routing_keys,
                    service_endpoint,
                    ..
                } => Some((recipient_keys, routing_keys, service_endpoint)),
                OutOfBandService::Did(_) => None,
            })
            .ok_or(Error::Unsupported("out-of-band invitation to a public DID"))?;

        let recipient_keys = parse_keys(recipient_keys)?;
        if recipient_keys.is_empty() {
            return Err(Error::MissingField("recipientKeys"));
        }

        Ok(InvitationTarget {
            id: self.header.id.clone(),
            label: self.label.clone(),
            recipient_keys,
            routing_keys: parse_keys(routing_keys)?,
            endpoint: endpoint.clone(),
            version,
        })
    }
}
