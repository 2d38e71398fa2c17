mod conn;
mod models;

pub use conn::{Handler, get_connection};
