//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that outlives the process and can be shared by several
//! processes on one host.
//!
//! Values are JSON text, so this backend only accepts
//! [`CachePayload::Text`]; the cache layer picks the text codec for it.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` operations
//! - Write transactions for `set`, `delete` and the clear operations
//! - Statistics are shared between clones of one backend; [`LmdbCacheBackend::handle`]
//!   opens a handle on the same environment with its own statistics

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use quickdoc_core::{CacheError, CacheResult};

use super::traits::{CacheBackend, CachePayload, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache.
///
/// Cloning yields another handle on the same environment.
///
/// # Example
///
/// ```ignore
/// use quickdoc_storage::cache::{CacheBackend, CachePayload, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/tmp/quickdoc-cache", 64)?;
/// backend.set("JSON\u{1f}entry\u{1f}user", CachePayload::Text("{}".into())).await?;
/// ```
#[derive(Clone)]
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Str>,
    /// Hit and miss counters.
    stats: Arc<RwLock<CacheStats>>,
}

impl std::fmt::Debug for LmdbCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheBackend")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    /// Another handle on the same environment, counting its own hits and
    /// misses.
    pub fn handle(&self) -> Self {
        Self {
            env: self.env.clone(),
            db: self.db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        let mut keys = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        for result in iter {
            match result {
                Ok((key, _)) => {
                    if key.starts_with(prefix) {
                        keys.push(key.to_string());
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(keys)
    }

    fn delete_keys(&self, keys: &[String]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<CachePayload>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        match self.db.get(&rtxn, key) {
            Ok(Some(text)) => {
                self.record_hit();
                Ok(Some(CachePayload::Text(text.to_string())))
            }
            Ok(None) => {
                self.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.record_miss();
                Err(txn_error(e).into())
            }
        }
    }

    async fn set(&self, key: &str, payload: CachePayload) -> CacheResult<()> {
        let CachePayload::Text(text) = payload else {
            return Err(CacheError::UnsupportedPayload {
                key: key.to_string(),
            });
        };

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        self.db.put(&mut wtxn, key, &text).map_err(txn_error)?;

        wtxn.commit().map_err(txn_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_error)?;

        wtxn.commit().map_err(txn_error)?;

        Ok(deleted)
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let keys = self.collect_keys_with_prefix(prefix)?;
        Ok(self.delete_keys(&keys)?)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let removed = self.db.len(&wtxn).map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(removed)
    }

    fn requires_text(&self) -> bool {
        true
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let entry_count = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            self.db.len(&rtxn).map_err(txn_error)?
        };

        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}
