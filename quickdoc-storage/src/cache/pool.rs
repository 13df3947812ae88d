//! Pooled and clustered cache backends.
//!
//! A pool spreads calls round-robin over distinct handles on one store. A
//! cluster partitions keys over independent shards by a stable hash, so a
//! key always lands on the same shard across processes and restarts.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quickdoc_core::{CacheBackendKind, CacheError, CacheOptions, CacheResult};

use super::lmdb_backend::LmdbCacheBackend;
use super::memory_backend::MemoryCacheBackend;
use super::traits::{CacheBackend, CachePayload, CacheStats};

// ============================================================================
// POOL
// ============================================================================

/// Round-robin over handles that all reach the same store.
///
/// Hits and misses are summed over the handles. The entry count comes from
/// the first handle, since every handle sees the same entries.
pub struct PooledCacheBackend {
    handles: Vec<Arc<dyn CacheBackend>>,
    next: AtomicUsize,
    requires_text: bool,
}

impl PooledCacheBackend {
    /// Build a pool. Fails on an empty handle list or handles that disagree
    /// on text payloads.
    pub fn new(handles: Vec<Arc<dyn CacheBackend>>) -> CacheResult<Self> {
        let requires_text = uniform_text_requirement(&handles)?;
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
            requires_text,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    fn handle(&self) -> &Arc<dyn CacheBackend> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[index]
    }
}

#[async_trait]
impl CacheBackend for PooledCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<CachePayload>> {
        self.handle().get(key).await
    }

    async fn set(&self, key: &str, payload: CachePayload) -> CacheResult<()> {
        self.handle().set(key, payload).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.handle().delete(key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.handle().clear_prefix(prefix).await
    }

    async fn clear(&self) -> CacheResult<u64> {
        self.handle().clear().await
    }

    fn requires_text(&self) -> bool {
        self.requires_text
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut total = CacheStats::default();
        for (index, handle) in self.handles.iter().enumerate() {
            let stats = handle.stats().await?;
            total.hits += stats.hits;
            total.misses += stats.misses;
            if index == 0 {
                total.entry_count = stats.entry_count;
            }
        }
        Ok(total)
    }
}

// ============================================================================
// CLUSTER
// ============================================================================

/// Hash-partitioned shards. Clears fan out to every shard.
pub struct ClusterCacheBackend {
    shards: Vec<Arc<dyn CacheBackend>>,
    requires_text: bool,
}

impl ClusterCacheBackend {
    pub fn new(shards: Vec<Arc<dyn CacheBackend>>) -> CacheResult<Self> {
        let requires_text = uniform_text_requirement(&shards)?;
        Ok(Self {
            shards,
            requires_text,
        })
    }

    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`.
    pub fn shard_index(&self, key: &str) -> usize {
        (stable_hash(key) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> &Arc<dyn CacheBackend> {
        &self.shards[self.shard_index(key)]
    }
}

#[async_trait]
impl CacheBackend for ClusterCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<CachePayload>> {
        self.shard(key).get(key).await
    }

    async fn set(&self, key: &str, payload: CachePayload) -> CacheResult<()> {
        self.shard(key).set(key, payload).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.shard(key).delete(key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut removed = 0;
        for shard in &self.shards {
            removed += shard.clear_prefix(prefix).await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut removed = 0;
        for shard in &self.shards {
            removed += shard.clear().await?;
        }
        Ok(removed)
    }

    fn requires_text(&self) -> bool {
        self.requires_text
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut total = CacheStats::default();
        for shard in &self.shards {
            total = total.merge(&shard.stats().await?);
        }
        Ok(total)
    }
}

/// 64-bit FNV-1a. Stable across builds, unlike `DefaultHasher`.
fn stable_hash(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

fn uniform_text_requirement(handles: &[Arc<dyn CacheBackend>]) -> CacheResult<bool> {
    let Some(first) = handles.first() else {
        return Err(CacheError::Backend {
            reason: "at least one backend handle is required".to_string(),
        });
    };
    let requires_text = first.requires_text();
    if handles.iter().any(|h| h.requires_text() != requires_text) {
        return Err(CacheError::Backend {
            reason: "backend handles disagree on text payloads".to_string(),
        });
    }
    Ok(requires_text)
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

/// Assemble the backend described by `options`.
pub fn build_backend(options: &CacheOptions) -> CacheResult<Arc<dyn CacheBackend>> {
    let shard_count = if options.cluster { options.pool_size } else { 1 };
    if shard_count == 0 || (options.pooled && options.pool_size == 0) {
        return Err(CacheError::Backend {
            reason: "pool_size must be at least 1".to_string(),
        });
    }

    let handle_count = if options.pooled { options.pool_size } else { 1 };
    let mut shards = Vec::with_capacity(shard_count);
    for index in 0..shard_count {
        let handles = open_shard(options, index, handle_count)?;
        let shard = if options.pooled {
            Arc::new(PooledCacheBackend::new(handles)?) as Arc<dyn CacheBackend>
        } else {
            handles.into_iter().next().ok_or_else(|| CacheError::Backend {
                reason: "no cache handle was opened".to_string(),
            })?
        };
        shards.push(shard);
    }

    if options.cluster {
        Ok(Arc::new(ClusterCacheBackend::new(shards)?))
    } else {
        shards.pop().ok_or_else(|| CacheError::Backend {
            reason: "no cache shard was opened".to_string(),
        })
    }
}

/// Open shard `index` and `handle_count` distinct handles on it.
fn open_shard(
    options: &CacheOptions,
    index: usize,
    handle_count: usize,
) -> CacheResult<Vec<Arc<dyn CacheBackend>>> {
    match options.backend {
        CacheBackendKind::Memory => {
            let store = MemoryCacheBackend::new();
            Ok((0..handle_count)
                .map(|_| Arc::new(store.handle()) as Arc<dyn CacheBackend>)
                .collect())
        }
        CacheBackendKind::External => {
            let root = options.path.as_deref().ok_or_else(|| CacheError::Backend {
                reason: "cache.path is required for the external backend".to_string(),
            })?;
            let path = if options.cluster {
                root.join(format!("shard-{index}"))
            } else {
                root.to_path_buf()
            };
            let env = open_lmdb(&path, options.max_size_mb)?;
            Ok((0..handle_count)
                .map(|_| Arc::new(env.handle()) as Arc<dyn CacheBackend>)
                .collect())
        }
    }
}

fn open_lmdb(path: &Path, max_size_mb: usize) -> CacheResult<LmdbCacheBackend> {
    let backend = LmdbCacheBackend::new(path, max_size_mb)?;
    tracing::info!(path = %path.display(), max_size_mb, "Opened LMDB cache");
    Ok(backend)
}
