//! Cache storage for the ticket cache.
//!
//! Query results fetched from the upstream API are written through to a
//! [`CacheStore`] and served from it when the upstream cannot be reached.
//! Keys are opaque strings chosen by the caller.
//!
//! Backends:
//!
//! - [`MemoryStore`]: process-local map (default)
//! - [`RocksDbStore`]: persistent store, behind the `rocksdb-backend` feature

mod entry;
mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_store;
mod traits;

pub use entry::CacheEntry;
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_store::{RocksDbConfig, RocksDbStore};
pub use traits::{CacheStore, StoreStats};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
