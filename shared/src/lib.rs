use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sent to the server when creating a new secret
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CreateSecretRequest {
    /// Encrypted payload, as produced by the client cipher. Opaque to the server.
    pub payload: String,
}

/// Gets returned by the server when creating a new secret
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SecretId {
    pub id: String,
}

/// Returned exactly once per secret, by the first successful consume
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ConsumedSecret {
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Error body returned by the server for any non-2xx response
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Route of the create endpoint, relative to the server root.
pub const SECRETS_PATH: &str = "/secrets";

/// Route of the consume endpoint for a given id, relative to the server root.
#[must_use]
pub fn consume_path(id: &str) -> String {
    format!("{SECRETS_PATH}/{id}/consume")
}

/// Message shown whenever a secret cannot be delivered.
///
/// Hedged on purpose: a lost response to an earlier consume looks exactly like
/// a secret that never existed.
pub const NOT_FOUND_MESSAGE: &str = "secret not found or already accessed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_path_nests_under_secrets() {
        assert_eq!(consume_path("01ABC"), "/secrets/01ABC/consume");
    }

    #[test]
    fn consumed_secret_uses_snake_case_fields() {
        let json = r#"{"payload":"abc","created_at":"2026-01-02T03:04:05Z"}"#;
        let parsed: ConsumedSecret = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.payload, "abc");
        assert_eq!(parsed.created_at.timestamp(), 1_767_323_045);
    }
}
