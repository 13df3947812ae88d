//! quickdoc - Key-Value Access over Document Stores
//!
//! A [`Database`] exposes dotted-path `get`/`set`/`delete`/`push`/`pull`/
//! `add`/`subtract`/`ensure`/`all` over one collection of a document store,
//! with a namespaced TTL cache in front of it.
//!
//! ```ignore
//! use quickdoc::{Database, DatabaseOptions, MemoryConnector};
//! use serde_json::json;
//!
//! let db = Database::in_memory("memory://localhost/app", DatabaseOptions::default(), MemoryConnector::default());
//! db.connect().await?;
//!
//! db.set("user", json!({ "name": "ada" })).await?;
//! db.set("user.langs", json!(["en"])).await?;
//! db.push("user.langs", "fr", false).await?;
//! assert_eq!(db.get("user.langs", false).await?, Some(json!(["en", "fr"])));
//!
//! let users = db.open_table("users").await?;
//! users.add("visits", 1).await?;
//! ```
//!
//! # Keys
//!
//! The part of a key before the first `.` names a document; the rest is a
//! path inside that document's data. Numeric segments also index arrays.
//!
//! # Consistency
//!
//! The store is authoritative. Writes reach the store before the cache, and
//! cache failures are logged rather than returned. Mutations of one root key
//! are serialized within a process. Another process writing the same store
//! can leave this handle's cache stale until the entry's TTL runs out;
//! `force_fetch` reads bypass the cache.

mod arrays;
mod database;
mod events;
mod locks;
mod ops;
mod query;

pub use database::{Database, HandleRole, PING_KEY};
pub use events::EventBus;
pub use locks::{KeyGuard, KeyLocks};
pub use query::{AllOptions, EntryFilter};

pub use quickdoc_core::{
    CacheBackendKind, CacheOptions, CollectionStats, ConnectionState, DatabaseOptions, Document,
    Entry, EventKind, LifecycleEvent, QuickDocError, QuickDocResult, TtlPolicy, WriteErrorPolicy,
};
pub use quickdoc_storage::{
    CacheStats, Connector, DocumentStore, MemoryCluster, MemoryConnection, MemoryConnector,
    StoreConnection,
};
#[cfg(feature = "mongodb")]
pub use quickdoc_storage::MongoConnector;
