//! keyfs: transactional key-value stores and metadata records for a
//! virtual filesystem, plus a network backend serving files from an HTTP
//! origin.

pub mod config;
pub mod error;
pub mod fetch;
pub mod meta;
pub mod store;

pub use config::{ConfigError, FetchConfig, IndexSource, TransportOptions};
pub use error::{PathHint, StoreError, StoreResult};
pub use fetch::{FetchBackend, HttpTransport, Transport, TransportError};
pub use meta::{Access, Credentials, MetadataRecord, RecordUpdate};
pub use store::{LocalFsStore, MemoryStore, Store, StoreFlags, Transaction, WrappedTransaction};
