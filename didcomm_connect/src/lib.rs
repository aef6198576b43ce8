#![deny(rustdoc::broken_intra_doc_links)]

//! # Pairwise DIDComm connections
//!
//! This crate establishes mutually authenticated pairwise relationships
//! ("connections") between two DIDComm agents and protects the messages they
//! exchange afterwards.
//!
//! The primary API is the [PairwiseAgent], which issues invitations as
//! [Callee], accepts them as [Caller], and dispatches inbound handshake
//! messages to the right role. Both the legacy `connections/1.0` handshake and
//! the current `didexchange/1.0` handshake are supported.
//!
//! The agent never touches the network: every step returns the packed
//! envelope together with the endpoint it must be delivered to.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use didcomm_connect::{
//!     Error, HandshakeConfig, LocalKms, MemoryStateStore, Outcome, PairwiseAgent,
//!     handshake::HandshakeState,
//! };
//!
//! fn agent(label: &str, endpoint: &str) -> Result<PairwiseAgent, Error> {
//!     Ok(PairwiseAgent::from_config(
//!         HandshakeConfig::new(label, endpoint.parse()?),
//!         LocalKms::new(),
//!         Arc::new(MemoryStateStore::new()),
//!     ))
//! }
//!
//! fn main() -> Result<(), Error> {
//!     let faber = agent("Faber", "https://faber.example/agent")?;
//!     let alice = agent("Alice", "https://alice.example/agent")?;
//!
//!     // faber invites, alice accepts
//!     let invitation = faber.callee().invite()?;
//!     let (alice_key, request) = alice.caller().connect(&invitation.invitation_target()?)?;
//!
//!     let Outcome::Reply { state_key: faber_key, outbound: response } =
//!         faber.handle_inbound(&request.message)?
//!     else {
//!         panic!("faber should respond to the request");
//!     };
//!
//!     let Outcome::Reply { outbound: complete, .. } = alice.handle_inbound(&response.message)?
//!     else {
//!         panic!("alice should complete the handshake");
//!     };
//!     assert_eq!(complete.endpoint.as_str(), "https://faber.example/agent");
//!
//!     faber.handle_inbound(&complete.message)?;
//!
//!     for (agent, key) in [(&alice, &alice_key), (&faber, &faber_key)] {
//!         let status = agent.tracker().status(key)?.expect("a stored relationship");
//!         assert_eq!(status.state, HandshakeState::ReadyAck);
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Signed DID document attachments of the current handshake
pub mod attachment;
pub mod config;

/// Key storage and the cryptographic capability the rest of the crate is written against:
///   - Ed25519 signatures
///   - authenticated and anonymous box encryption with X25519 keys derived
///     from the Ed25519 keys
pub mod crypto;

/// Defines common key types used throughout the project.
pub mod definitions;

/// DID documents, the `did:peer:0`/`did:key` and legacy methods, and DID normalization
pub mod did;
mod error;
pub mod forward;
pub mod handshake;

/// Wire messages of the connection protocols
pub mod messages;

/// Envelope encryption: the packers and the registry selecting between them
pub mod packer;
pub mod pairwise;
pub mod pipe;

/// Legacy timestamped connection signatures
pub mod signature;
pub mod state;

#[cfg(feature = "async")]
mod secure_storage;

#[cfg(test)]
mod test;

pub use config::HandshakeConfig;
pub use crypto::LocalKms;
pub use error::Error;
pub use packer::{Packager, PackerRegistry};
pub use pairwise::{Callee, Caller, DidRegistrar, Outbound, Outcome, PairwiseAgent};
pub use pipe::SecurePipe;
pub use state::{MemoryStateStore, ProtocolStateTracker, StateKey, StateStore};

#[cfg(feature = "async")]
pub use secure_storage::{AskarStateStorage, SecureStorage, Snapshot};
