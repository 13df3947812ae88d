//! quickdoc Storage - Document Stores and Cache
//!
//! Defines the document store contracts a database handle talks to, an
//! in-memory implementation for tests and embedded use, a MongoDB
//! implementation behind the `mongodb` feature, and the cache layer.

pub mod cache;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod store;

pub use cache::{
    build_backend, CacheBackend, CacheEnvelope, CacheLayer, CachePayload, CacheStats,
    ClusterCacheBackend, EntryClass, LmdbCacheBackend, LmdbCacheError, MemoryCacheBackend,
    NamespacedKey, PooledCacheBackend, TtlSet, TtlWindow, WriteOrigin,
};
pub use memory::{
    database_name_from_url, InMemoryDocumentStore, MemoryCluster, MemoryConnection,
    MemoryConnector, DEFAULT_DATABASE,
};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoConnection, MongoConnector, MongoDocumentStore};
pub use store::{Connector, DocumentStore, StoreConnection};
