//! Server settings, read from the environment (after `.env` is loaded by the binary).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024 * 5 + 200;
pub const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Postgres URL. Without it the server keeps secrets in memory.
    pub database_url: Option<String>,
    pub cert_location: Option<PathBuf>,
    /// Largest accepted ciphertext, in bytes.
    pub max_size: usize,
    /// Unread payloads are cleared this long after creation.
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            database_url: None,
            cert_location: None,
            max_size: DEFAULT_MAX_SIZE,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            address: get("ADDRESS").unwrap_or(defaults.address),
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            database_url: get("DATABASE_URL"),
            cert_location: get("CERT_LOCATION").map(PathBuf::from),
            max_size: parse_or("MAX_SIZE", get("MAX_SIZE"), defaults.max_size)?,
            retention: Duration::from_secs(parse_or(
                "RETENTION_SECS",
                get("RETENTION_SECS"),
                DEFAULT_RETENTION_SECS,
            )?),
            sweep_interval: Duration::from_secs(parse_or(
                "SWEEP_INTERVAL_SECS",
                get("SWEEP_INTERVAL_SECS"),
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Zero("MAX_SIZE"));
        }
        if self.retention.is_zero() {
            return Err(ConfigError::Zero("RETENTION_SECS"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Zero("SWEEP_INTERVAL_SECS"));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
