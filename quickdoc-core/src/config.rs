//! Configuration types

use crate::{ConfigError, QuickDocError, QuickDocResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection used when none is given.
pub const DEFAULT_COLLECTION: &str = "JSON";

/// Cache TTL windows in signed milliseconds.
///
/// Negative disables the class, zero caches forever, positive is the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// Single-key reads.
    pub read_ms: i64,
    /// Full-collection snapshots.
    pub snapshot_ms: i64,
    /// Latency probe.
    pub probe_ms: i64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            read_ms: 300_000,
            snapshot_ms: 600_000,
            probe_ms: 60_000,
        }
    }
}

impl TtlPolicy {
    /// Policy with every class disabled.
    pub fn disabled() -> Self {
        Self {
            read_ms: -1,
            snapshot_ms: -1,
            probe_ms: -1,
        }
    }

    pub fn with_read_ms(mut self, ms: i64) -> Self {
        self.read_ms = ms;
        self
    }

    pub fn with_snapshot_ms(mut self, ms: i64) -> Self {
        self.snapshot_ms = ms;
        self
    }

    pub fn with_probe_ms(mut self, ms: i64) -> Self {
        self.probe_ms = ms;
        self
    }
}

/// Which cache backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// In-process map, values stored as-is.
    #[default]
    Memory,
    /// LMDB environment on disk, values stored as JSON text.
    External,
}

/// Cache backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    pub backend: CacheBackendKind,
    /// Hash-partition keys across `pool_size` shards.
    pub cluster: bool,
    /// Round-robin over `pool_size` handles.
    pub pooled: bool,
    pub pool_size: usize,
    /// LMDB directory. Required for the external backend.
    pub path: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub max_size_mb: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            cluster: false,
            pooled: false,
            pool_size: 4,
            path: None,
            max_size_mb: 64,
        }
    }
}

impl CacheOptions {
    /// External LMDB cache rooted at `path`.
    pub fn external(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: CacheBackendKind::External,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_cluster(mut self, pool_size: usize) -> Self {
        self.cluster = true;
        self.pool_size = pool_size;
        self
    }

    pub fn with_pool(mut self, pool_size: usize) -> Self {
        self.pooled = true;
        self.pool_size = pool_size;
        self
    }

    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }
}

/// What to do when a store write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteErrorPolicy {
    /// Log and carry on. The cache is left untouched.
    #[default]
    Swallow,
    /// Return the store error to the caller.
    Propagate,
}

/// Options for a database handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    pub collection_name: String,
    pub ttl: TtlPolicy,
    pub cache: CacheOptions,
    pub write_errors: WriteErrorPolicy,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION.to_string(),
            ttl: TtlPolicy::default(),
            cache: CacheOptions::default(),
            write_errors: WriteErrorPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl DatabaseOptions {
    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }

    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_write_errors(mut self, policy: WriteErrorPolicy) -> Self {
        self.write_errors = policy;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `QUICKDOC_COLLECTION`: collection name (default: `JSON`)
    /// - `QUICKDOC_CACHE_READ_TTL_MS`: single-key read TTL (default: 300000)
    /// - `QUICKDOC_CACHE_SNAPSHOT_TTL_MS`: snapshot TTL (default: 600000)
    /// - `QUICKDOC_CACHE_PROBE_TTL_MS`: latency probe TTL (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            collection_name: std::env::var("QUICKDOC_COLLECTION")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.collection_name),
            ttl: TtlPolicy {
                read_ms: std::env::var("QUICKDOC_CACHE_READ_TTL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.ttl.read_ms),
                snapshot_ms: std::env::var("QUICKDOC_CACHE_SNAPSHOT_TTL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.ttl.snapshot_ms),
                probe_ms: std::env::var("QUICKDOC_CACHE_PROBE_TTL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.ttl.probe_ms),
            },
            ..defaults
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - collection_name is not empty
    /// - pool_size >= 1 when clustering or pooling
    /// - the external backend has a path
    /// - max_size_mb > 0
    /// - event_capacity > 0
    pub fn validate(&self) -> QuickDocResult<()> {
        if self.collection_name.trim().is_empty() {
            return Err(invalid(
                "collection_name",
                &self.collection_name,
                "collection_name must not be empty",
            ));
        }

        if (self.cache.cluster || self.cache.pooled) && self.cache.pool_size == 0 {
            return Err(invalid(
                "cache.pool_size",
                &self.cache.pool_size.to_string(),
                "pool_size must be at least 1 when cluster or pooled is set",
            ));
        }

        if self.cache.backend == CacheBackendKind::External && self.cache.path.is_none() {
            return Err(QuickDocError::Config(ConfigError::MissingRequired {
                field: "cache.path".to_string(),
            }));
        }

        if self.cache.max_size_mb == 0 {
            return Err(invalid(
                "cache.max_size_mb",
                "0",
                "max_size_mb must be greater than 0",
            ));
        }

        if self.event_capacity == 0 {
            return Err(invalid(
                "event_capacity",
                "0",
                "event_capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> QuickDocError {
    QuickDocError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
