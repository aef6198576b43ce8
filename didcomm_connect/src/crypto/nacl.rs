use crypto_box::{
    ChaChaBox, PublicKey, SecretKey,
    aead::{Aead, AeadCore, OsRng},
};
use ed25519_dalek::{SigningKey, VerifyingKey};

use super::CryptoError;
use crate::definitions::PublicVerificationKeyData;

const NONCE_SIZE: usize = 24;
const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret matching an Ed25519 signing key (the libsodium `sk_to_curve25519` conversion)
fn box_secret(signing_key: &SigningKey) -> SecretKey {
    SecretKey::from(signing_key.to_scalar_bytes())
}

/// X25519 public key matching an Ed25519 verkey (birational map to Montgomery form)
fn box_public(verkey: &PublicVerificationKeyData) -> Result<PublicKey, CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(verkey)
        .map_err(|_| CryptoError::InvalidKey(verkey.to_base58()))?;

    Ok(PublicKey::from(verifying_key.to_montgomery().to_bytes()))
}

/// Nonce for sealed boxes, bound to both the ephemeral and the recipient key
fn sealed_nonce(ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; NONCE_SIZE] {
    use blake2::Digest;
    type Blake2b192 = blake2::Blake2b<typenum::U24>;

    let mut hasher = Blake2b192::new();
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    hasher.finalize().into()
}

/// Encrypt `plaintext` so that only `recipient` can read it and it can verify `sender` wrote it.
/// Output layout: `nonce || ciphertext+tag`
pub(crate) fn seal_authenticated(
    sender: &SigningKey,
    recipient: &PublicVerificationKeyData,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let sender_box = ChaChaBox::new(&box_public(recipient)?, &box_secret(sender));
    let nonce = ChaChaBox::generate_nonce(&mut OsRng);

    let ciphertext = sender_box
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed(format!("box for {recipient}")))?;

    let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    data.extend_from_slice(&nonce);
    data.extend(ciphertext);

    Ok(data)
}

pub(crate) fn open_authenticated(
    recipient: &SigningKey,
    sender: &PublicVerificationKeyData,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed("box too short".into()));
    }

    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    let receiver_box = ChaChaBox::new(&box_public(sender)?, &box_secret(recipient));

    receiver_box
        .decrypt(nonce.into(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed(format!("box from {sender}")))
}

/// Encrypt `plaintext` for `recipient` under a fresh ephemeral key; the sender stays anonymous.
/// Output layout: `ephemeral public key || ciphertext+tag`
pub(crate) fn seal_anonymous(
    recipient: &PublicVerificationKeyData,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let recipient = box_public(recipient)?;
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_public = ephemeral.public_key();

    let nonce = sealed_nonce(&ephemeral_public, &recipient);
    let sealed_box = ChaChaBox::new(&recipient, &ephemeral);

    let ciphertext = sealed_box
        .encrypt(nonce.as_slice().into(), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("sealed box".into()))?;

    let mut data = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    data.extend_from_slice(ephemeral_public.as_bytes());
    data.extend(ciphertext);

    Ok(data)
}

pub(crate) fn open_anonymous(recipient: &SigningKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBLIC_KEY_SIZE {
        return Err(CryptoError::DecryptionFailed("sealed box too short".into()));
    }

    let (ephemeral, ciphertext) = data.split_at(PUBLIC_KEY_SIZE);
    let ephemeral = PublicKey::from_slice(ephemeral)
        .map_err(|_| CryptoError::DecryptionFailed("invalid ephemeral key".into()))?;

    let secret = box_secret(recipient);
    let nonce = sealed_nonce(&ephemeral, &secret.public_key());
    let sealed_box = ChaChaBox::new(&ephemeral, &secret);

    sealed_box
        .decrypt(nonce.as_slice().into(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("sealed box".into()))
}

#[cfg(test)]
mod test {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;

    #[test]
    fn authenticated_box() {
        let alice = SigningKey::generate(&mut OsRng);
        let bob = SigningKey::generate(&mut OsRng);
        let alice_verkey = PublicVerificationKeyData::from(alice.verifying_key().to_bytes());
        let bob_verkey = PublicVerificationKeyData::from(bob.verifying_key().to_bytes());

        let data = seal_authenticated(&alice, &bob_verkey, b"hello bob").unwrap();
        assert_eq!(
            open_authenticated(&bob, &alice_verkey, &data).unwrap(),
            b"hello bob"
        );

        // a different claimed sender must not open the box
        let mallory = SigningKey::generate(&mut OsRng);
        let mallory_verkey = PublicVerificationKeyData::from(mallory.verifying_key().to_bytes());
        assert!(open_authenticated(&bob, &mallory_verkey, &data).is_err());
    }

    #[test]
    fn sealed_box() {
        let bob = SigningKey::generate(&mut OsRng);
        let bob_verkey = PublicVerificationKeyData::from(bob.verifying_key().to_bytes());

        let mut data = seal_anonymous(&bob_verkey, b"hello anyone").unwrap();
        assert_eq!(open_anonymous(&bob, &data).unwrap(), b"hello anyone");

        let last = data.len() - 1;
        data[last] ^= 1;
        assert!(open_anonymous(&bob, &data).is_err());
        assert!(open_anonymous(&bob, &data[..10]).is_err());
    }
}
