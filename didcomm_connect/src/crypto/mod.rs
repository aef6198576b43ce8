use crate::definitions::{KeyId, PublicVerificationKeyData};

pub mod error;
mod kms;
mod nacl;

pub use error::CryptoError;
pub use kms::LocalKms;

/// Public view of a key held by a [KeyManager]; the private half never leaves it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyHandle {
    pub kid: KeyId,
    pub public_key: PublicVerificationKeyData,
}

impl KeyHandle {
    pub fn new(public_key: PublicVerificationKeyData) -> Self {
        Self {
            kid: public_key.to_base58(),
            public_key,
        }
    }
}

// ANCHOR: key-manager-mbBook
/// Key storage capability
pub trait KeyManager: Send + Sync {
    /// Generate a fresh Ed25519 key pair and return its public half
    fn create_key(&self) -> Result<KeyHandle, CryptoError>;

    /// Look up the key identified by `kid`
    fn get(&self, kid: &str) -> Result<KeyHandle, CryptoError>;
}

/// Signing and encryption capability, operating on keys held by a [KeyManager]
pub trait Crypto: Send + Sync {
    /// Sign `message` with the private key identified by `kid`
    fn sign(&self, kid: &str, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify an Ed25519 `signature` over `message`
    fn verify(
        &self,
        verkey: &PublicVerificationKeyData,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        verify_signature(verkey, message, signature)
    }

    /// Encrypt `plaintext` for `recipient`; authenticated when `sender_kid` is given,
    /// anonymous otherwise
    fn encrypt(
        &self,
        sender_kid: Option<&str>,
        recipient: &PublicVerificationKeyData,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a ciphertext produced by [Crypto::encrypt] with the key `recipient_kid`
    fn decrypt(
        &self,
        recipient_kid: &str,
        sender: Option<&PublicVerificationKeyData>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}
// ANCHOR_END: key-manager-mbBook

/// Verify an Ed25519 signature without any key store
pub fn verify_signature(
    verkey: &PublicVerificationKeyData,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let invalid = || CryptoError::SignatureInvalid(verkey.to_base58());

    let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|_| invalid())?;
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(verkey)
        .map_err(|_| CryptoError::InvalidKey(verkey.to_base58()))?;

    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::{Crypto, KeyManager, LocalKms, verify_signature};

    #[test]
    fn sign_verify() {
        let kms = LocalKms::new();
        let key = kms.create_key().unwrap();

        let mut signature = kms.sign(&key.kid, b"connection data").unwrap();
        assert!(verify_signature(&key.public_key, b"connection data", &signature).is_ok());
        assert!(verify_signature(&key.public_key, b"connection date", &signature).is_err());

        for i in 0..signature.len() {
            signature[i] ^= 0x01;
            assert!(
                kms.verify(&key.public_key, b"connection data", &signature)
                    .is_err()
            );
            signature[i] ^= 0x01;
        }
    }

    #[test]
    fn encrypt_decrypt() {
        let alice = LocalKms::new();
        let bob = LocalKms::new();
        let alice_key = alice.create_key().unwrap();
        let bob_key = bob.create_key().unwrap();

        let authenticated = alice
            .encrypt(Some(&alice_key.kid), &bob_key.public_key, b"cek")
            .unwrap();
        assert_eq!(
            bob.decrypt(&bob_key.kid, Some(&alice_key.public_key), &authenticated)
                .unwrap(),
            b"cek"
        );

        let anonymous = alice.encrypt(None, &bob_key.public_key, b"cek").unwrap();
        assert_eq!(bob.decrypt(&bob_key.kid, None, &anonymous).unwrap(), b"cek");

        // alice does not hold bob's key
        assert!(alice.decrypt(&bob_key.kid, None, &anonymous).is_err());
    }
}
