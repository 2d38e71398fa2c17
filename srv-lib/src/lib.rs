pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod expiry;
pub mod schema;
pub mod store;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use store::{MemoryStore, SecretStore};
