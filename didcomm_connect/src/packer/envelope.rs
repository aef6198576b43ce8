use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::PackerKind;
use crate::{
    crypto::{CryptoError, KeyHandle, KeyManager},
    definitions::{PackedMessage, decode_base64},
};

pub(crate) const CONTENT_ENCRYPTION: &str = "chacha20poly1305_ietf";
pub(crate) const ENVELOPE_TYPE: &str = "JWM/1.0";

const CEK_SIZE: usize = 32;
const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

pub(crate) type ContentKey = Zeroizing<[u8; CEK_SIZE]>;

/// Outer JSON form of a packed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JweEnvelope {
    pub protected: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Decoded `protected` member; its base64 form is the AEAD associated data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub enc: String,
    pub typ: String,
    pub alg: String,
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub encrypted_key: String,
    pub header: RecipientHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientHeader {
    pub kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

pub(crate) fn fresh_content_key() -> ContentKey {
    let mut cek = Zeroizing::new([0u8; CEK_SIZE]);
    OsRng.fill_bytes(&mut cek[..]);

    cek
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(bytes)
}

pub(crate) fn decode(field: &'static str, encoded: &str) -> Result<Vec<u8>, CryptoError> {
    decode_base64(encoded)
        .ok_or_else(|| CryptoError::DecryptionFailed(format!("invalid base64 in '{field}'")))
}

impl JweEnvelope {
    /// Encrypt `payload` under `cek`, binding the recipient list through the protected header
    pub(crate) fn seal(
        kind: PackerKind,
        recipients: Vec<Recipient>,
        cek: &ContentKey,
        payload: &[u8],
    ) -> Result<PackedMessage, CryptoError> {
        let header = ProtectedHeader {
            enc: CONTENT_ENCRYPTION.to_string(),
            typ: ENVELOPE_TYPE.to_string(),
            alg: kind.as_str().to_string(),
            recipients,
        };

        let header = serde_json::to_vec(&header)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let protected = encode(&header);

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&cek[..]));
        let mut ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: payload,
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed("content encryption".into()))?;

        let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

        let envelope = JweEnvelope {
            protected,
            iv: encode(&iv),
            ciphertext: encode(&ciphertext),
            tag: encode(&tag),
        };

        serde_json::to_vec(&envelope).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// Parse the outer envelope and its protected header without decrypting anything
    pub(crate) fn parse(packed: &[u8]) -> Result<(Self, ProtectedHeader), CryptoError> {
        let envelope: JweEnvelope = serde_json::from_slice(packed)
            .map_err(|_| CryptoError::DecryptionFailed("not a packed envelope".into()))?;

        let header = decode("protected", &envelope.protected)?;
        let header: ProtectedHeader = serde_json::from_slice(&header)
            .map_err(|_| CryptoError::DecryptionFailed("invalid protected header".into()))?;

        Ok((envelope, header))
    }

    pub(crate) fn open(&self, cek: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cek.len() != CEK_SIZE {
            return Err(CryptoError::DecryptionFailed("invalid content key".into()));
        }

        let iv = decode("iv", &self.iv)?;
        if iv.len() != IV_SIZE {
            return Err(CryptoError::DecryptionFailed("invalid iv".into()));
        }

        let mut ciphertext = decode("ciphertext", &self.ciphertext)?;
        ciphertext.extend(decode("tag", &self.tag)?);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(cek));
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &ciphertext,
                    aad: self.protected.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed("content decryption".into()))
    }
}

impl ProtectedHeader {
    /// Find the first recipient entry whose key is held by `kms`
    pub(crate) fn find_recipient(
        &self,
        kms: &dyn KeyManager,
    ) -> Result<(&Recipient, KeyHandle), CryptoError> {
        self.recipients
            .iter()
            .find_map(|recipient| {
                kms.get(&recipient.header.kid)
                    .ok()
                    .map(|handle| (recipient, handle))
            })
            .ok_or_else(|| {
                let kids = self
                    .recipients
                    .iter()
                    .map(|r| r.header.kid.as_str())
                    .collect::<Vec<_>>();

                CryptoError::KeyNotFound(kids.join(","))
            })
    }
}
