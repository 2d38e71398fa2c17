//! Creation and retrieval flows for one-time secrets.
//!
//! [`SecretClient`] composes the cipher, the local [`SecretCache`] and a
//! [`Transport`] to the store. The key is generated and consumed here and
//! never handed to the transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::cache::{CacheBackend, SecretCache};
use crate::crypto::{self, CipherError};
use crate::error::ClientError;
use crate::locator::{Locator, PartialLocator};
use crate::transport::{Transport, TransportError};

/// Observable steps of a retrieval.
///
/// `MissingKey`, `NotFound` and `DecryptError` are terminal. `Ready` and
/// `Revealed` flip back and forth through [`RevealableSecret`] only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Init,
    ResolvingKey,
    MissingKey,
    Fetching { from_cache: bool },
    NotFound,
    Decrypting,
    DecryptError,
    Ready,
    Revealed,
}

/// Where a retrieved ciphertext came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Store,
}

/// Result of a successful creation.
#[derive(Debug)]
pub struct CreatedSecret {
    pub locator: Locator,
    /// False if the local cache could not be written; the creator will then
    /// burn the secret by opening their own link.
    pub cached: bool,
}

/// A decrypted secret that starts out hidden.
pub struct RevealableSecret {
    id: String,
    text: String,
    revealed: bool,
    source: Source,
}

impl RevealableSecret {
    fn new(id: String, text: String, source: Source) -> Self {
        Self {
            id,
            text,
            revealed: false,
            source,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }

    /// The plaintext, only once revealed.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.revealed.then_some(self.text.as_str())
    }

    pub fn reveal(&mut self) -> &str {
        self.revealed = true;
        &self.text
    }

    pub fn hide(&mut self) {
        self.revealed = false;
    }

    /// Flip between hidden and revealed, returning the new visibility.
    pub fn toggle(&mut self) -> bool {
        self.revealed = !self.revealed;
        self.revealed
    }

    #[must_use]
    pub fn state(&self) -> RetrievalState {
        if self.revealed {
            RetrievalState::Revealed
        } else {
            RetrievalState::Ready
        }
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl fmt::Debug for RevealableSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealableSecret")
            .field("id", &self.id)
            .field("revealed", &self.revealed)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

type InFlight = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct SecretClient<T, B> {
    transport: T,
    cache: SecretCache<B>,
    origin: String,
    in_flight: InFlight,
}

impl<T: Transport, B: CacheBackend> SecretClient<T, B> {
    /// `origin` is the base that share links are built under.
    pub fn new(transport: T, cache: SecretCache<B>, origin: &str) -> Result<Self, ClientError> {
        // Validates the origin once, up front.
        Locator::new(origin, "", "")?;

        Ok(Self {
            transport,
            cache,
            origin: origin.to_string(),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &SecretCache<B> {
        &self.cache
    }

    /// Encrypt `plaintext`, store it, and return the share link.
    pub async fn create(&self, plaintext: &str) -> Result<CreatedSecret, ClientError> {
        if plaintext.trim().is_empty() {
            return Err(ClientError::EmptySecret);
        }

        let key = crypto::generate_key();
        let ciphertext =
            crypto::encrypt(plaintext, &key).map_err(|_| ClientError::Encryption)?;

        let id = self
            .transport
            .create_secret(&ciphertext)
            .await
            .map_err(map_transport_error)?;

        info!("Created secret with id: {id}");

        let locator = Locator::new(&self.origin, id.clone(), crypto::export_key(&key))?;

        let cached = match self.cache.set(&id, &ciphertext) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to cache created secret {id}: {e}");
                false
            }
        };

        Ok(CreatedSecret { locator, cached })
    }

    pub async fn retrieve(
        &self,
        locator: &PartialLocator,
    ) -> Result<RevealableSecret, ClientError> {
        self.retrieve_with(locator, |_| {}).await
    }

    /// Resolve `locator` to a hidden plaintext, reporting each step to `observe`.
    ///
    /// The store is consulted only on a cache miss, and the ciphertext is cached
    /// before decryption so this client can come back to it later.
    pub async fn retrieve_with<F>(
        &self,
        locator: &PartialLocator,
        mut observe: F,
    ) -> Result<RevealableSecret, ClientError>
    where
        F: FnMut(RetrievalState) + Send,
    {
        observe(RetrievalState::Init);
        observe(RetrievalState::ResolvingKey);

        let Some(encoded_key) = locator.key.as_deref() else {
            observe(RetrievalState::MissingKey);
            return Err(ClientError::MissingKey);
        };

        // A malformed key could never decrypt anything, so refuse before burning the secret.
        let key = match crypto::import_key(encoded_key) {
            Ok(key) => key,
            Err(CipherError::KeyFormat(reason)) => {
                observe(RetrievalState::MissingKey);
                return Err(ClientError::InvalidKey(reason));
            }
            Err(_) => {
                observe(RetrievalState::MissingKey);
                return Err(ClientError::InvalidKey("unreadable key".to_string()));
            }
        };

        let id = locator.id.as_str();
        let slot = self.in_flight_slot(id);

        let fetched = {
            let _guard = slot.lock().await;
            self.fetch_ciphertext(id, &mut observe).await
        };
        self.release_slot(id, slot);

        let (ciphertext, source) = fetched?;

        observe(RetrievalState::Decrypting);
        let text = match crypto::decrypt(&ciphertext, &key) {
            Ok(text) => text,
            Err(e) => {
                debug!("Decryption of secret {id} failed: {e}");
                observe(RetrievalState::DecryptError);
                return Err(ClientError::Decryption);
            }
        };

        observe(RetrievalState::Ready);
        Ok(RevealableSecret::new(id.to_string(), text, source))
    }

    async fn fetch_ciphertext<F>(
        &self,
        id: &str,
        observe: &mut F,
    ) -> Result<(String, Source), ClientError>
    where
        F: FnMut(RetrievalState) + Send,
    {
        if let Some(ciphertext) = self.cache.get(id)? {
            observe(RetrievalState::Fetching { from_cache: true });
            debug!("Secret {id} served from local cache");
            return Ok((ciphertext, Source::Cache));
        }

        observe(RetrievalState::Fetching { from_cache: false });
        info!("Consuming secret with id: {id}");

        let ciphertext = match self.transport.consume_secret(id).await {
            Ok(ciphertext) => ciphertext,
            Err(TransportError::NotFound) => {
                observe(RetrievalState::NotFound);
                return Err(ClientError::NotFound);
            }
            Err(e) => return Err(map_transport_error(e)),
        };

        if let Err(e) = self.cache.set(id, &ciphertext) {
            warn!("Failed to cache consumed secret {id}: {e}");
        }

        Ok((ciphertext, Source::Store))
    }

    fn in_flight_slot(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(in_flight.entry(id.to_string()).or_default())
    }

    fn release_slot(&self, id: &str, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // One reference in the map, one held here: nobody else is waiting.
        if Arc::strong_count(&slot) == 2 {
            in_flight.remove(id);
        }
    }
}

fn map_transport_error(e: TransportError) -> ClientError {
    match e {
        TransportError::NotFound => ClientError::NotFound,
        other => ClientError::Transport(other.to_string()),
    }
}
