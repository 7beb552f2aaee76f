//! In-memory cache store.

use crate::traits::Counters;
use crate::{CacheEntry, CacheStore, Result, StoreStats};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-local cache store.
///
/// Contents are lost on restart; use the RocksDB backend for durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    counters: Counters,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.entries.read().get(key).cloned();
        self.counters.record_lookup(entry.is_some());
        Ok(entry)
    }

    fn put(&self, key: &str, content: Bytes) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry::new(content));
        self.counters.record_write();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}
