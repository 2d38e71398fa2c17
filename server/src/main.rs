use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::{Context, Result};
use ember_srv::api::{self, Limits};
use ember_srv::db::get_connection;
use ember_srv::expiry::spawn_sweeper;
use ember_srv::{MemoryStore, SecretStore, ServerConfig};
use log::{LevelFilter, info, warn};
use std::env::var;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut logger = pretty_env_logger::formatted_timed_builder();
    logger.format_timestamp_millis().filter_level(LevelFilter::Info);
    if let Ok(filters) = var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    match config.database_url.clone() {
        Some(db_url) => {
            let handler = get_connection(&db_url, config.cert_location.clone())
                .await
                .context("Failed to connect to the database")?;
            serve(Arc::new(handler), config).await
        }
        None => {
            warn!("DATABASE_URL is not set, secrets are kept in memory and lost on restart");
            serve(Arc::new(MemoryStore::new()), config).await
        }
    }
}

async fn serve<S: SecretStore>(store: Arc<S>, config: ServerConfig) -> Result<()> {
    let sweeper = spawn_sweeper(Arc::clone(&store), config.retention, config.sweep_interval);

    let store = Data::from(store);
    let limits = Limits {
        max_size: config.max_size,
    };

    info!(
        "Listening on {}:{} (retention {}s)",
        config.address,
        config.port,
        config.retention.as_secs()
    );

    let result = HttpServer::new(move || {
        App::new().configure(|cfg| api::configure(cfg, store.clone(), limits))
    })
    .bind((config.address.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.address, config.port))?
    .run()
    .await
    .context("Server error");

    sweeper.abort();
    result
}
