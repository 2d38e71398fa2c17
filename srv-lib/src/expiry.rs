//! Background sweep bounding how long an unread payload can live on the server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info};
use tokio::task::JoinHandle;

use crate::errors::ServerError;
use crate::store::SecretStore;

/// Clear everything older than `retention`, once.
pub async fn sweep<S: SecretStore + ?Sized>(
    store: &S,
    retention: Duration,
) -> Result<usize, ServerError> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    store.clear_expired(cutoff).await
}

/// Run [`sweep`] every `interval` until the task is aborted.
///
/// A failed sweep is logged and retried on the next tick.
pub fn spawn_sweeper<S: SecretStore>(
    store: Arc<S>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match sweep(store.as_ref(), retention).await {
                Ok(0) => {}
                Ok(cleared) => info!("Cleared {cleared} expired secrets"),
                Err(e) => error!("Failed to clear expired secrets: {e}"),
            }
        }
    })
}
