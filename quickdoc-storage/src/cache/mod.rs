//! Cache layer for quickdoc.
//!
//! A [`CacheLayer`] sits between a database handle and its document store.
//! It caches root payloads, the collection listing and the measured store
//! latency, each under its own TTL window, over a pluggable
//! [`CacheBackend`].
//!
//! # Backends
//!
//! - [`MemoryCacheBackend`]: in-process map, values kept as-is.
//! - [`LmdbCacheBackend`]: LMDB environment on disk, values kept as JSON text.
//! - [`PooledCacheBackend`] / [`ClusterCacheBackend`]: round-robin handles and
//!   hash-partitioned shards over either of the above.
//!
//! # Namespacing
//!
//! Every physical key is a [`NamespacedKey`], so a handle, its children and
//! its tables can share one backend without seeing each other's entries.
//!
//! # Example
//!
//! ```ignore
//! let backend = build_backend(&CacheOptions::default())?;
//! let layer = CacheLayer::new(backend, "JSON", TtlPolicy::default().into());
//!
//! layer.write("user", json!({ "name": "a" }), None, WriteOrigin::Single).await?;
//! assert_eq!(layer.read("user").await?, Some(json!({ "name": "a" })));
//! ```

pub mod layer;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod namespace;
pub mod pool;
pub mod traits;
pub mod ttl;

pub use layer::{CacheLayer, Codec, WriteOrigin};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::MemoryCacheBackend;
pub use namespace::{EntryClass, NamespacedKey};
pub use pool::{build_backend, ClusterCacheBackend, PooledCacheBackend};
pub use traits::{CacheBackend, CacheEnvelope, CachePayload, CacheStats};
pub use ttl::{TtlSet, TtlWindow};
