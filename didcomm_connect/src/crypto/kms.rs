use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;

use super::{Crypto, CryptoError, KeyHandle, KeyManager, nacl};
use crate::definitions::{KeyId, PrivateSigningKeyData, PublicVerificationKeyData};

/// In-memory key manager holding Ed25519 signing keys, indexed by base58 verkey
///
/// Encryption keys are derived from the signing keys, so a single key serves as
/// both the DID verkey and the envelope recipient key.
#[derive(Default, Clone)]
pub struct LocalKms {
    keys: Arc<RwLock<HashMap<KeyId, SigningKey>>>,
}

/// A custom implementation of Debug to avoid key material from leaking
impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kids = self
            .keys
            .read()
            .map(|keys| keys.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        f.debug_struct("LocalKms").field("kids", &kids).finish()
    }
}

impl LocalKms {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add an existing secret (e.g. restored from storage) and return its handle
    pub fn import_key(&self, secret: &PrivateSigningKeyData) -> Result<KeyHandle, CryptoError> {
        let signing_key = SigningKey::from_bytes(secret);
        let handle = KeyHandle::new(signing_key.verifying_key().to_bytes().into());

        self.keys.write()?.insert(handle.kid.clone(), signing_key);

        Ok(handle)
    }

    /// Export all secrets, keyed by their key identifier
    pub fn export(&self) -> Result<Vec<(KeyId, PrivateSigningKeyData)>, CryptoError> {
        Ok(self
            .keys
            .read()?
            .iter()
            .map(|(kid, key)| (kid.clone(), key.to_bytes().into()))
            .collect())
    }

    fn signing_key(&self, kid: &str) -> Result<SigningKey, CryptoError> {
        self.keys
            .read()?
            .get(kid)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(kid.to_string()))
    }
}

impl KeyManager for LocalKms {
    fn create_key(&self) -> Result<KeyHandle, CryptoError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let handle = KeyHandle::new(signing_key.verifying_key().to_bytes().into());

        self.keys.write()?.insert(handle.kid.clone(), signing_key);

        Ok(handle)
    }

    fn get(&self, kid: &str) -> Result<KeyHandle, CryptoError> {
        let signing_key = self.signing_key(kid)?;

        Ok(KeyHandle::new(signing_key.verifying_key().to_bytes().into()))
    }
}

impl Crypto for LocalKms {
    fn sign(&self, kid: &str, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.signing_key(kid)?.sign(message).to_bytes().to_vec())
    }

    fn encrypt(
        &self,
        sender_kid: Option<&str>,
        recipient: &PublicVerificationKeyData,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match sender_kid {
            Some(kid) => nacl::seal_authenticated(&self.signing_key(kid)?, recipient, plaintext),
            None => nacl::seal_anonymous(recipient, plaintext),
        }
    }

    fn decrypt(
        &self,
        recipient_kid: &str,
        sender: Option<&PublicVerificationKeyData>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let recipient = self.signing_key(recipient_kid)?;

        match sender {
            Some(sender) => nacl::open_authenticated(&recipient, sender, ciphertext),
            None => nacl::open_anonymous(&recipient, ciphertext),
        }
    }
}
