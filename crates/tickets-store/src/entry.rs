//! Cached query results.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Result, StoreError};

/// A cached upstream response together with the time it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The raw response body.
    pub content: Bytes,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            updated_at: now(),
        }
    }

    /// Encode for backends that store raw bytes.
    ///
    /// Format: `[u64 updated_at][content]`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.content.len());
        buf.put_u64(self.updated_at);
        buf.put_slice(&self.content);
        buf.freeze()
    }

    /// Decode an entry produced by [`CacheEntry::encode`].
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(StoreError::Corruption("entry shorter than header".into()));
        }
        let updated_at = data.get_u64();
        Ok(Self {
            content: Bytes::copy_from_slice(data),
            updated_at,
        })
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
