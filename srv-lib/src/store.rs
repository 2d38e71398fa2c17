//! Read-once persistence of ciphertexts.
//!
//! Every successful [`SecretStore::consume`] is destructive. There is no way to
//! look at a payload without clearing it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ember_shared::ConsumedSecret;
use ulid::Ulid;

use crate::errors::ServerError;

#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Persist `payload` under a fresh id.
    async fn create(&self, payload: String) -> Result<String, ServerError>;

    /// Atomically take the payload for `id`.
    ///
    /// Of any number of concurrent calls for one id, at most one succeeds; the
    /// rest get [`ServerError::NotFound`], as do calls for unknown, expired or
    /// malformed ids.
    async fn consume(&self, id: &str) -> Result<ConsumedSecret, ServerError>;

    /// Clear every payload created before `cutoff`. Returns how many were cleared.
    async fn clear_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, ServerError>;
}

/// Ids are ULIDs; anything else cannot exist in the store.
pub fn parse_id(id: &str) -> Result<Ulid, ServerError> {
    Ulid::from_string(id).map_err(|_| ServerError::NotFound)
}

#[derive(Debug)]
struct Record {
    payload: Option<String>,
    created_at: DateTime<Utc>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Ulid, Record>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<Ulid, Record>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[cfg(test)]
    fn insert_at(&self, payload: &str, created_at: DateTime<Utc>) -> String {
        let id = Ulid::new();
        self.records().insert(
            id,
            Record {
                payload: Some(payload.to_string()),
                created_at,
            },
        );
        id.to_string()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn create(&self, payload: String) -> Result<String, ServerError> {
        let id = Ulid::new();
        self.records().insert(
            id,
            Record {
                payload: Some(payload),
                created_at: Utc::now(),
            },
        );
        Ok(id.to_string())
    }

    async fn consume(&self, id: &str) -> Result<ConsumedSecret, ServerError> {
        let id = parse_id(id)?;
        let mut records = self.records();
        let record = records.get_mut(&id).ok_or(ServerError::NotFound)?;
        let payload = record.payload.take().ok_or(ServerError::NotFound)?;

        Ok(ConsumedSecret {
            payload,
            created_at: record.created_at,
        })
    }

    async fn clear_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, ServerError> {
        let mut records = self.records();

        // Tombstones past the window can go entirely; ULIDs are never reissued.
        records.retain(|_, r| r.payload.is_some() || r.created_at >= cutoff);

        let mut cleared = 0;
        for record in records.values_mut().filter(|r| r.created_at < cutoff) {
            if record.payload.take().is_some() {
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn consume_is_read_once() {
        let store = MemoryStore::new();
        let id = store.create("sealed".into()).await.unwrap();

        let first = store.consume(&id).await.unwrap();
        assert_eq!(first.payload, "sealed");
        assert!(matches!(store.consume(&id).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let store = MemoryStore::new();
        let unknown = Ulid::new().to_string();
        assert!(matches!(store.consume(&unknown).await, Err(ServerError::NotFound)));
        assert!(matches!(store.consume("../etc").await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = MemoryStore::new();
        let a = store.create("a".into()).await.unwrap();
        let b = store.create("b".into()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_deliver_once() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create("race".into()).await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move { store.consume(&id).await })
            })
            .collect();

        let mut delivered = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(secret) => {
                    assert_eq!(secret.payload, "race");
                    delivered += 1;
                }
                Err(ServerError::NotFound) => not_found += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(delivered, 1);
        assert_eq!(not_found, 31);
    }

    #[tokio::test]
    async fn expiry_clears_unread_payloads() {
        let store = MemoryStore::new();
        let old = store.insert_at("old", Utc::now() - Duration::hours(2));
        let fresh = store.create("fresh".into()).await.unwrap();

        let cleared = store
            .clear_expired(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(cleared, 1);

        assert!(matches!(store.consume(&old).await, Err(ServerError::NotFound)));
        assert_eq!(store.consume(&fresh).await.unwrap().payload, "fresh");
    }

    #[tokio::test]
    async fn expiry_purges_old_tombstones() {
        let store = MemoryStore::new();
        let id = store.insert_at("x", Utc::now() - Duration::hours(2));
        store.consume(&id).await.unwrap();

        let cleared = store
            .clear_expired(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(cleared, 0);
        assert!(store.records().is_empty());
        assert!(matches!(store.consume(&id).await, Err(ServerError::NotFound)));
    }
}
