use crate::{crypto::CryptoError, handshake::StateError};

/// Error originating from the connection core
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error: no packager bound to the owning side of the pipe")]
    CryptoUnavailable,
    #[error("Error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Error: {0}")]
    State(#[from] StateError),
    #[error("Error: signature is {age}s old, freshness window is {window}s")]
    SignatureExpired { age: i64, window: u64 },
    #[error("Error: malformed attachment: {0}")]
    MalformedAttachment(String),
    #[error("Error: missing field '{0}'")]
    MissingField(&'static str),
    #[error("Error: cannot resolve DID '{0}'")]
    UnknownDidMethod(String),
    #[error("Error: unsupported: {0}")]
    Unsupported(&'static str),
    #[error("Error: no pending handshake for {0}")]
    MissingPendingState(String),
    #[error("Error: unexpected message '{0}'")]
    UnexpectedMessage(String),
    #[error("Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Error: {0}")]
    Url(#[from] url::ParseError),
    #[cfg(feature = "async")]
    #[error("Error: {0}")]
    Storage(#[from] aries_askar::Error),
    #[error("Error: could not decode stored state: {0}")]
    DecodeState(&'static str),
    #[error("Internal error")]
    Internal,
}

impl Error {
    /// Whether the peer sent something we refuse (as opposed to a local failure)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Crypto(CryptoError::SignatureInvalid(_))
                | Error::Crypto(CryptoError::DecryptionFailed(_))
                | Error::Crypto(CryptoError::UnknownPacker(_))
                | Error::SignatureExpired { .. }
                | Error::MalformedAttachment(_)
                | Error::MissingField(_)
                | Error::UnknownDidMethod(_)
                | Error::UnexpectedMessage(_)
                | Error::MissingPendingState(_)
                | Error::State(_)
                | Error::Json(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Internal
    }
}
