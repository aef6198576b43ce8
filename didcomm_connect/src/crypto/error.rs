#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("no packer registered for algorithm '{0}'")]
    UnknownPacker(String),
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("could not verify signature for verkey {0}")]
    SignatureInvalid(String),
    #[error("key store lock poisoned")]
    Internal,
}

impl<T> From<std::sync::PoisonError<T>> for CryptoError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Internal
    }
}
