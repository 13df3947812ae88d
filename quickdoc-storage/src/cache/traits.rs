//! Cache backend trait and payload types.

use async_trait::async_trait;
use quickdoc_core::{CacheResult, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached root payload with its bookkeeping.
///
/// `cached_at` travels with the value so TTL checks work the same whether
/// the backend is private to one handle or shared between processes.
/// `expires_at` mirrors the document's own `expireAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub payload: Value,
    pub cached_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl CacheEnvelope {
    pub fn new(payload: Value, cached_at: Timestamp, expires_at: Option<Timestamp>) -> Self {
        Self {
            payload,
            cached_at,
            expires_at,
        }
    }

    /// True once the underlying document's own expiry has passed.
    pub fn document_expired_at(&self, now: Timestamp) -> bool {
        quickdoc_core::is_expired(self.expires_at, now)
    }
}

/// What a backend stores.
///
/// In-process backends keep envelopes as they are; string-oriented backends
/// only accept [`CachePayload::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Native(CacheEnvelope),
    Text(String),
}

/// Cache backend trait for pluggable cache implementations.
///
/// Keys are opaque strings; namespacing is the caller's job (see
/// [`super::NamespacedKey`]).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache.
    async fn get(&self, key: &str) -> CacheResult<Option<CachePayload>>;

    /// Put a value into the cache, replacing any previous value.
    async fn set(&self, key: &str, payload: CachePayload) -> CacheResult<()>;

    /// Delete one key. Returns true if it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key starting with `prefix`. Returns keys removed.
    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Delete everything. Returns keys removed.
    async fn clear(&self) -> CacheResult<u64>;

    /// True if the backend only stores [`CachePayload::Text`].
    fn requires_text(&self) -> bool;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Sum of two snapshots, for backends made of several handles.
    pub fn merge(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            entry_count: self.entry_count + other.entry_count,
        }
    }
}
