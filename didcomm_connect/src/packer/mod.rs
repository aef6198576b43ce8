use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    crypto::{Crypto, CryptoError, KeyHandle, KeyManager, LocalKms},
    definitions::{PackedMessage, PublicVerificationKeyData},
};

mod anoncrypt;
mod authcrypt;
pub mod envelope;

pub use anoncrypt::Anoncrypt;
pub use authcrypt::Authcrypt;
use envelope::{JweEnvelope, ProtectedHeader};

/// The envelope encryption algorithms this crate can produce and consume
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackerKind {
    Authcrypt,
    Anoncrypt,
}

impl PackerKind {
    /// Value of the `alg` member of the protected header
    pub fn as_str(&self) -> &'static str {
        match self {
            PackerKind::Authcrypt => "Authcrypt",
            PackerKind::Anoncrypt => "Anoncrypt",
        }
    }
}

/// Plaintext side of a packed message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub message: Vec<u8>,
    /// Sender key; required for authenticated packing, absent after anonymous unpacking
    pub from_key: Option<PublicVerificationKeyData>,
    /// Recipients when packing; the local key that opened the message when unpacking
    pub to_keys: Vec<PublicVerificationKeyData>,
}

// ANCHOR: custom-packer-mbBook
/// One interchangeable envelope encryption algorithm
pub trait Packer: Send + Sync {
    fn kind(&self) -> PackerKind;

    fn pack(
        &self,
        crypto: &dyn Crypto,
        payload: &[u8],
        sender: Option<&KeyHandle>,
        recipients: &[PublicVerificationKeyData],
    ) -> Result<PackedMessage, CryptoError>;

    fn unpack(
        &self,
        crypto: &dyn Crypto,
        kms: &dyn KeyManager,
        envelope: &JweEnvelope,
        header: &ProtectedHeader,
    ) -> Result<Envelope, CryptoError>;
}

/// Packaging capability bound to one agent's keys
pub trait Packager: Send + Sync {
    /// Pack with the primary (outbound) packer
    fn pack(&self, envelope: &Envelope) -> Result<PackedMessage, CryptoError>;

    /// Pack with a specific packer, e.g. anonymous layers for forwarding
    fn pack_with(&self, kind: PackerKind, envelope: &Envelope)
    -> Result<PackedMessage, CryptoError>;

    /// Unpack, detecting the packer from the envelope
    fn unpack(&self, packed: &[u8]) -> Result<Envelope, CryptoError>;

    fn kms(&self) -> &dyn KeyManager;

    fn crypto(&self) -> &dyn Crypto;
}
// ANCHOR_END: custom-packer-mbBook

/// Registry of packers, built once at startup and shared by reference
///
/// Outbound messages always use the primary packer; inbound messages are
/// dispatched on the `alg` member of their protected header.
#[derive(Clone)]
pub struct PackerRegistry {
    primary: PackerKind,
    packers: Vec<Arc<dyn Packer>>,
    kms: Arc<dyn KeyManager>,
    crypto: Arc<dyn Crypto>,
}

impl std::fmt::Debug for PackerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackerRegistry")
            .field("primary", &self.primary)
            .field(
                "packers",
                &self.packers.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PackerRegistry {
    /// Registry with both built-in packers and [Authcrypt] as primary
    pub fn new(kms: LocalKms) -> Self {
        let kms = Arc::new(kms);

        Self::with_capabilities(kms.clone(), kms)
    }

    /// Registry over externally provided key and crypto capabilities
    pub fn with_capabilities(kms: Arc<dyn KeyManager>, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            primary: PackerKind::Authcrypt,
            packers: vec![Arc::new(Authcrypt) as Arc<dyn Packer>, Arc::new(Anoncrypt)],
            kms,
            crypto,
        }
    }

    /// Select the packer used for outbound messages
    pub fn with_primary(mut self, primary: PackerKind) -> Self {
        self.primary = primary;
        self
    }

    /// Add a packer, replacing any registered packer of the same kind
    pub fn register(&mut self, packer: Arc<dyn Packer>) {
        self.packers.retain(|p| p.kind() != packer.kind());
        self.packers.push(packer);
    }

    pub fn primary(&self) -> PackerKind {
        self.primary
    }

    fn packer(&self, alg: &str) -> Result<&dyn Packer, CryptoError> {
        self.packers
            .iter()
            .find(|p| p.kind().as_str() == alg)
            .map(|p| p.as_ref())
            .ok_or_else(|| CryptoError::UnknownPacker(alg.to_string()))
    }
}

impl Packager for PackerRegistry {
    fn pack(&self, envelope: &Envelope) -> Result<PackedMessage, CryptoError> {
        self.pack_with(self.primary, envelope)
    }

    fn pack_with(
        &self,
        kind: PackerKind,
        envelope: &Envelope,
    ) -> Result<PackedMessage, CryptoError> {
        if envelope.to_keys.is_empty() {
            return Err(CryptoError::EncryptionFailed("no recipient keys".into()));
        }

        let sender = envelope
            .from_key
            .as_ref()
            .map(|key| self.kms.get(&key.to_base58()))
            .transpose()?;

        trace!(
            "packing {} bytes with {} for {} recipient(s)",
            envelope.message.len(),
            kind.as_str(),
            envelope.to_keys.len()
        );

        self.packer(kind.as_str())?.pack(
            &*self.crypto,
            &envelope.message,
            sender.as_ref(),
            &envelope.to_keys,
        )
    }

    fn unpack(&self, packed: &[u8]) -> Result<Envelope, CryptoError> {
        let (envelope, header) = JweEnvelope::parse(packed)?;

        if header.enc != envelope::CONTENT_ENCRYPTION {
            return Err(CryptoError::UnknownPacker(header.enc));
        }

        let packer = self.packer(&header.alg)?;
        trace!("unpacking {} envelope", header.alg);

        packer.unpack(&*self.crypto, &*self.kms, &envelope, &header)
    }

    fn kms(&self) -> &dyn KeyManager {
        &*self.kms
    }

    fn crypto(&self) -> &dyn Crypto {
        &*self.crypto
    }
}
