use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::ConnectionError;
use diesel::ConnectionResult;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use ember_shared::ConsumedSecret;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::info;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use std::fs::read;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::time::Duration;

use crate::db::models::Secret;
use crate::errors::ServerError;
use crate::schema::CREATE_SECRETS_TABLE;
use crate::store::{SecretStore, parse_id};

/// Extra root certificate for self-signed database servers.
static DB_CERT: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Postgres-backed [`SecretStore`].
#[derive(Clone)]
pub struct Handler {
    conn: Pool<AsyncPgConnection>,
}

pub async fn get_connection(url: &str, cert: Option<PathBuf>) -> Result<Handler, ServerError> {
    // Fails only if a provider is already installed, which is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _ = DB_CERT.set(cert);

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(establish_connection);
    let mgr = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(url, config);

    let conn = Pool::builder()
        .max_size(10)
        .min_idle(Some(5))
        .max_lifetime(Some(Duration::from_secs(60 * 60 * 24)))
        .idle_timeout(Some(Duration::from_secs(60 * 2)))
        .build(mgr)
        .await
        .map_err(|e| ServerError::DatabaseError(e.to_string()))?;

    let handler = Handler { conn };
    handler.ensure_schema().await?;

    info!("Connected to database");

    Ok(handler)
}

fn establish_connection(config: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let mut root_store = RootCertStore::empty();

        if let Some(cert_location) = DB_CERT.get().and_then(Option::as_ref) {
            let file_bytes =
                read(cert_location).map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
            let cert = CertificateDer::from_pem_slice(&file_bytes)
                .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
            root_store
                .add(cert)
                .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        }

        let rustls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(rustls_config);
        let (client, conn) = tokio_postgres::connect(config, tls)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

        AsyncPgConnection::try_from_client_and_connection(client, conn).await
    };
    fut.boxed()
}

impl Handler {
    async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, ServerError> {
        self.conn
            .get()
            .await
            .map_err(|e| ServerError::DatabaseError(e.to_string()))
    }

    async fn ensure_schema(&self) -> Result<(), ServerError> {
        let mut conn = self.get().await?;

        conn.batch_execute(CREATE_SECRETS_TABLE)
            .await
            .map_err(|e| ServerError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for Handler {
    async fn create(&self, payload: String) -> Result<String, ServerError> {
        let mut conn = self.get().await?;

        let secret = Secret::new(payload);
        let secret_id = secret.get_id();

        secret
            .insert(&mut conn)
            .await
            .map_err(|e| ServerError::DatabaseError(e.to_string()))?;

        Ok(secret_id)
    }

    async fn consume(&self, id: &str) -> Result<ConsumedSecret, ServerError> {
        parse_id(id)?;

        let mut conn = self.get().await?;

        Secret::consume(id, &mut conn)
            .await
            .map_err(|e| ServerError::DatabaseError(e.to_string()))?
            .ok_or(ServerError::NotFound)
    }

    async fn clear_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, ServerError> {
        let mut conn = self.get().await?;

        Secret::clear_expired(cutoff, &mut conn)
            .await
            .map_err(|e| ServerError::DatabaseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    use super::*;

    /// Point `DATABASE_URL` at a disposable database to run these.
    async fn handler() -> Handler {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL is not set");
        get_connection(&url, None).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn concurrent_consumes_deliver_once() {
        let store = Arc::new(handler().await);
        let id = store.create("sealed".to_string()).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move { store.consume(&id).await })
            })
            .collect();

        let mut delivered = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(secret) => {
                    assert_eq!(secret.payload, "sealed");
                    delivered += 1;
                }
                Err(e) => assert!(matches!(e, ServerError::NotFound), "unexpected error: {e}"),
            }
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn expiry_clears_unread_rows() {
        let store = handler().await;

        let old = Secret::backdated("old", Utc::now() - ChronoDuration::hours(2));
        let old_id = old.get_id();
        old.insert(&mut store.get().await.unwrap()).await.unwrap();
        let fresh_id = store.create("fresh".to_string()).await.unwrap();

        let cleared = store
            .clear_expired(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert!(cleared >= 1);

        assert!(matches!(
            store.consume(&old_id).await,
            Err(ServerError::NotFound)
        ));
        assert_eq!(store.consume(&fresh_id).await.unwrap().payload, "fresh");
    }
}
