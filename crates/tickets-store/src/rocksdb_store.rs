//! RocksDB persistent cache store.

use crate::traits::Counters;
use crate::{CacheEntry, CacheStore, Result, StoreError, StoreStats};
use bytes::Bytes;
use rocksdb::{BlockBasedOptions, DBWithThreadMode, IteratorMode, MultiThreaded, Options};
use std::path::{Path, PathBuf};

/// RocksDB store configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Enable LZ4 compression.
    pub compression_enabled: bool,
    /// Bloom filter bits per key (0 to disable).
    pub bloom_filter_bits: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache"),
            write_buffer_size: 16 * 1024 * 1024, // 16 MB
            compression_enabled: true,
            bloom_filter_bits: 10,
        }
    }
}

/// Persistent cache store backed by RocksDB.
pub struct RocksDbStore {
    db: DBWithThreadMode<MultiThreaded>,
    counters: Counters,
}

impl RocksDbStore {
    /// Opens or creates a database.
    pub fn open(config: RocksDbConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);

        if config.compression_enabled {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let mut block_opts = BlockBasedOptions::default();
        if config.bloom_filter_bits > 0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        }
        opts.set_block_based_table_factory(&block_opts);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, &config.path)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!(path = %config.path.display(), "Opened RocksDB cache store");

        Ok(Self {
            db,
            counters: Counters::default(),
        })
    }

    /// Opens with default configuration at `path`.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }
}

impl CacheStore for RocksDbStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.counters.record_lookup(raw.is_some());
        raw.map(|data| CacheEntry::decode(&data)).transpose()
    }

    fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let entry = CacheEntry::new(content);
        self.db
            .put(key.as_bytes(), entry.encode())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.counters.record_write();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.db.iterator(IteratorMode::Start) {
            item.map_err(|e| StoreError::Backend(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}
