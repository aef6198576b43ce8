//! Configuration of a connection agent.
//!
//! # Example
//!
//! ```
//! use didcomm_connect::config::{ExpiryPolicy, HandshakeConfig};
//!
//! let config: HandshakeConfig = serde_json::from_str(
//!     r#"{
//!         "label": "Faber College",
//!         "endpoint": "https://faber.example/agent",
//!         "version": "legacy",
//!         "expired_signature": "warn"
//!     }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.freshness_window, 36_000);
//! assert_eq!(config.expired_signature, ExpiryPolicy::Warn);
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    definitions::PublicVerificationKeyData,
    did::DidMethod,
    handshake::Version,
    packer::PackerKind,
    signature::{DEFAULT_FRESHNESS_WINDOW, Freshness},
};

/// What to do with a connection signature outside the freshness window
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    #[default]
    Reject,
    /// Accept and log a warning
    Warn,
}

/// Everything but the endpoint has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Label presented to peers in requests and invitations
    #[serde(default)]
    pub label: String,
    /// Endpoint published in our DID documents
    pub endpoint: Url,
    /// Handshake offered in invitations we create
    #[serde(default)]
    pub version: Version,
    /// Method of the pairwise DIDs we create
    #[serde(default)]
    pub did_method: DidMethod,
    /// Maximum age of a legacy connection signature, in seconds
    #[serde(default = "default_freshness_window")]
    pub freshness_window: u64,
    #[serde(default)]
    pub expired_signature: ExpiryPolicy,
    /// Packer for messages on established relationships; handshake messages
    /// are always authcrypted
    #[serde(default = "default_packer")]
    pub primary_packer: PackerKind,
    /// Keys of the mediators between peers and us, first hop first
    #[serde(default)]
    pub routing_keys: Vec<PublicVerificationKeyData>,
}

fn default_freshness_window() -> u64 {
    DEFAULT_FRESHNESS_WINDOW
}

fn default_packer() -> PackerKind {
    PackerKind::Authcrypt
}

impl HandshakeConfig {
    pub fn new(label: &str, endpoint: Url) -> Self {
        Self {
            label: label.to_string(),
            endpoint,
            version: Version::default(),
            did_method: DidMethod::default(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            expired_signature: ExpiryPolicy::default(),
            primary_packer: PackerKind::Authcrypt,
            routing_keys: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_did_method(mut self, did_method: DidMethod) -> Self {
        self.did_method = did_method;
        self
    }

    pub fn with_primary_packer(mut self, primary_packer: PackerKind) -> Self {
        self.primary_packer = primary_packer;
        self
    }

    pub fn with_routing_keys(mut self, routing_keys: Vec<PublicVerificationKeyData>) -> Self {
        self.routing_keys = routing_keys;
        self
    }

    pub fn freshness(&self) -> Freshness {
        Freshness {
            window: self.freshness_window,
            on_expired: self.expired_signature,
        }
    }
}
