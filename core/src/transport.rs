//! Boundary between the lifecycle client and the one-time store.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The store has no payload for this id: unknown, already consumed, or expired.
    #[error("secret not found or already accessed")]
    NotFound,

    /// The store answered but refused the request.
    #[error("request rejected by server: {0}")]
    Rejected(String),

    /// The store could not be reached, or the response was lost or unreadable.
    #[error("could not reach server: {0}")]
    Unavailable(String),
}

/// RPC surface of the secret store, as seen by a client.
///
/// Only ciphertext and ids ever cross this boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Store a new ciphertext and return its id.
    async fn create_secret(&self, payload: &str) -> Result<String, TransportError>;

    /// Destructively fetch the ciphertext for `id`.
    ///
    /// Not idempotent: a second call for the same id must yield
    /// [`TransportError::NotFound`].
    async fn consume_secret(&self, id: &str) -> Result<String, TransportError>;
}
