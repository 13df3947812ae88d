//! In-process cache backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quickdoc_core::CacheResult;
use tokio::sync::RwLock;

use super::traits::{CacheBackend, CachePayload, CacheStats};

/// Map-backed cache. Stores payloads as given, without serialization.
///
/// Handles made with [`MemoryCacheBackend::handle`] share the entries and
/// count their own hits and misses.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<RwLock<HashMap<String, CachePayload>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle on the same entries.
    pub fn handle(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of entries, without touching hit statistics.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<CachePayload>> {
        let found = self.entries.read().await.get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(found)
    }

    async fn set(&self, key: &str, payload: CachePayload) -> CacheResult<()> {
        self.entries.write().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    fn requires_text(&self) -> bool {
        false
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.read().await.len() as u64,
        })
    }
}
