use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::locator::LocatorError;

/// Terminal outcomes of the creation and retrieval flows.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no encryption key found in the secret link")]
    MissingKey,

    #[error("invalid encryption key in the secret link: {0}")]
    InvalidKey(String),

    #[error("secret not found or already accessed")]
    NotFound,

    #[error("failed to decrypt secret: invalid key or corrupted data")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("{0}")]
    Transport(String),

    #[error("secret must not be empty")]
    EmptySecret,

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Caller-facing classification of a [`ClientError`].
///
/// `NotFound` and `DecryptError` must stay distinct: the first means the secret
/// is gone, the second that the link itself is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MissingKey,
    DecryptError,
    TransportError,
    InvalidInput,
    LocalError,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MissingKey => "missing_key",
            Self::DecryptError => "decrypt_error",
            Self::TransportError => "transport_error",
            Self::InvalidInput => "invalid_input",
            Self::LocalError => "local_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingKey | Self::InvalidKey(_) => ErrorKind::MissingKey,
            Self::NotFound => ErrorKind::NotFound,
            Self::Decryption => ErrorKind::DecryptError,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::EmptySecret | Self::Locator(_) => ErrorKind::InvalidInput,
            Self::Encryption | Self::Cache(_) => ErrorKind::LocalError,
        }
    }

    /// Only transport failures are worth retrying; everything else yields the
    /// same outcome on the same inputs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
