pub mod cache;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod locator;
pub mod transport;

pub use cache::{CacheBackend, CacheError, FileBackend, MemoryBackend, SecretCache};
pub use error::{ClientError, ErrorKind, ErrorReport};
pub use lifecycle::{CreatedSecret, RetrievalState, RevealableSecret, SecretClient, Source};
pub use locator::{Locator, LocatorError, PartialLocator};
pub use transport::{Transport, TransportError};
