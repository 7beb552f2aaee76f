//! Storage backend traits.

use crate::{CacheEntry, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Key-value persistence for cached query results.
///
/// Writes are upserts: storing under an existing key replaces the entry.
pub trait CacheStore: Send + Sync {
    /// Retrieves the entry stored under `key`.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores `content` under `key`, stamping it with the current time.
    fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Returns the number of entries in the store.
    fn len(&self) -> Result<usize>;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns store statistics.
    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, content: Bytes) -> Result<()> {
        (**self).put(key, content)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn stats(&self) -> StoreStats {
        (**self).stats()
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Completed writes.
    pub writes: u64,
}

impl StoreStats {
    /// Returns the hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    pub(crate) fn record_lookup(&self, found: bool) {
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
