//! Document store contracts.
//!
//! A store is an ordered collection of documents keyed by a unique string
//! ID. Connections hand out collections and report lifecycle events;
//! connectors open connections from a url.
//!
//! Stores do not hide logically expired documents. Callers re-check
//! `expireAt` on every read.

use std::sync::Arc;

use async_trait::async_trait;
use quickdoc_core::{
    CollectionMetadata, CollectionStats, Document, DocumentPatch, LifecycleEvent, NewDocument,
    StorageResult,
};
use tokio::sync::broadcast;

/// One physical collection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ========================================================================
    // READS
    // ========================================================================

    /// Get a document by ID.
    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Document>>;

    /// Every document in insertion order.
    async fn find_all(&self) -> StorageResult<Vec<Document>>;

    /// Document count, possibly from collection metadata.
    async fn estimated_count(&self) -> StorageResult<u64>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a new document. Fails with `DuplicateId` if the ID exists.
    async fn create_document(&self, document: NewDocument) -> StorageResult<Document>;

    /// Apply a patch to an existing document.
    ///
    /// Returns false if no document has this ID.
    async fn update_document(&self, id: &str, patch: DocumentPatch) -> StorageResult<bool>;

    /// Delete one document. Returns the number removed (0 or 1).
    async fn delete_one(&self, id: &str) -> StorageResult<u64>;

    /// Delete every document. Returns the number removed.
    async fn delete_many(&self) -> StorageResult<u64>;

    /// Drop the collection with its indexes.
    async fn drop_collection(&self) -> StorageResult<()>;

    // ========================================================================
    // METADATA
    // ========================================================================

    fn metadata(&self) -> CollectionMetadata;

    /// Document count, total size and index count of the collection.
    async fn stats(&self) -> StorageResult<CollectionStats>;
}

/// A live connection to a database.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Bind a collection by name. Binding the same name twice yields views of
    /// the same collection.
    async fn collection(&self, name: &str) -> StorageResult<Arc<dyn DocumentStore>>;

    /// Lifecycle events reported by the connection.
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;

    fn is_open(&self) -> bool;

    /// Close the connection. `force` skips waiting for in-flight work.
    async fn close(&self, force: bool) -> StorageResult<()>;

    fn database_name(&self) -> &str;
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> StorageResult<Arc<dyn StoreConnection>>;
}
