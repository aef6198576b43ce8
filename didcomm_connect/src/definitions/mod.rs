use core::fmt;
use std::{fmt::Debug, ops::Deref};
use zeroize::Zeroize;

use serde::{Deserialize, Serialize};

pub const PRIVATE_SIGNING_KEY_SIZE: usize = 32;

pub const PUBLIC_VERIFICATION_KEY_SIZE: usize = 32;

/// Key identifier as used on the wire: the base58 encoding of a raw verification key
pub type KeyId = String;

pub type PackedMessage = Vec<u8>;

#[derive(Clone, Zeroize)]
pub struct PrivateSigningKeyData([u8; PRIVATE_SIGNING_KEY_SIZE]);

/// Raw Ed25519 verification key ("verkey")
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicVerificationKeyData([u8; PUBLIC_VERIFICATION_KEY_SIZE]);

impl PublicVerificationKeyData {
    /// The base58 (bitcoin alphabet) form used in DID documents and envelopes
    pub fn to_base58(&self) -> KeyId {
        bs58::encode(&self.0)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .into_string()
    }

    pub fn from_base58(encoded: &str) -> Option<Self> {
        let mut buf = [0u8; PUBLIC_VERIFICATION_KEY_SIZE];
        let written = bs58::decode(encoded)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .onto(&mut buf)
            .ok()?;

        (written == PUBLIC_VERIFICATION_KEY_SIZE).then_some(Self(buf))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; PUBLIC_VERIFICATION_KEY_SIZE]>::try_from(bytes)
            .ok()
            .map(Self)
    }
}

impl Debug for PublicVerificationKeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verkey({})", self.to_base58())
    }
}

impl fmt::Display for PublicVerificationKeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl Serialize for PublicVerificationKeyData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PublicVerificationKeyData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base58(&encoded)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid verkey '{encoded}'")))
    }
}

impl Debug for PrivateSigningKeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateSigningKeyData([redacted])")
    }
}

impl AsRef<[u8]> for PrivateSigningKeyData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PublicVerificationKeyData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; PRIVATE_SIGNING_KEY_SIZE]> for PrivateSigningKeyData {
    fn from(data: [u8; PRIVATE_SIGNING_KEY_SIZE]) -> PrivateSigningKeyData {
        PrivateSigningKeyData(data)
    }
}

impl From<[u8; PUBLIC_VERIFICATION_KEY_SIZE]> for PublicVerificationKeyData {
    fn from(data: [u8; PUBLIC_VERIFICATION_KEY_SIZE]) -> PublicVerificationKeyData {
        PublicVerificationKeyData(data)
    }
}

impl Deref for PublicVerificationKeyData {
    type Target = [u8; PUBLIC_VERIFICATION_KEY_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for PrivateSigningKeyData {
    type Target = [u8; PRIVATE_SIGNING_KEY_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Decode base64 in any of the alphabets peers are known to emit
/// (url-safe or standard, with or without padding)
pub(crate) fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    use base64ct::{Base64, Base64Unpadded, Base64Url, Base64UrlUnpadded, Encoding};

    Base64Url::decode_vec(encoded)
        .or_else(|_| Base64UrlUnpadded::decode_vec(encoded))
        .or_else(|_| Base64::decode_vec(encoded))
        .or_else(|_| Base64Unpadded::decode_vec(encoded))
        .ok()
}
