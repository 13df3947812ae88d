//! In-memory document store.
//!
//! A [`MemoryCluster`] plays the role of a database server: every connection
//! opened against the same url through connectors sharing one cluster sees
//! the same collections. Tests use that to mutate a store behind a
//! database handle's back.
//!
//! Like a real server with a TTL index, the store keeps logically expired
//! documents until [`InMemoryDocumentStore::sweep_expired`] runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use quickdoc_core::{
    CollectionMetadata, CollectionStats, Document, DocumentPatch, LifecycleEvent, NewDocument,
    StorageError, StorageResult,
};
use tokio::sync::{broadcast, RwLock};

use crate::store::{Connector, DocumentStore, StoreConnection};

/// Database used when the url names none.
pub const DEFAULT_DATABASE: &str = "test";

const EVENT_CAPACITY: usize = 64;

/// Indexes an in-memory collection stands in for: unique `ID` and expiry.
const MEMORY_INDEX_COUNT: u64 = 2;

/// Database name from a connection url: the path component after the host,
/// without query string.
pub fn database_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);

    after_scheme
        .split_once('/')
        .map(|(_, path)| path.trim_matches('/'))
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_DATABASE)
        .to_string()
}

// ============================================================================
// CLUSTER
// ============================================================================

#[derive(Debug, Default)]
struct FaultSwitches {
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    refuse_connections: AtomicBool,
}

#[derive(Debug, Default)]
struct CollectionState {
    documents: RwLock<Vec<Document>>,
}

type Databases = HashMap<String, HashMap<String, Arc<CollectionState>>>;

#[derive(Debug, Default)]
struct ClusterInner {
    databases: RwLock<Databases>,
    faults: FaultSwitches,
}

/// Shared in-memory server.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StorageError::Write`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.faults.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with `StorageError::Query`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent connect fail with `StorageError::Connection`.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner
            .faults
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Run the expiry sweep over every collection. Returns documents removed.
    pub async fn sweep_expired(&self) -> u64 {
        let collections: Vec<Arc<CollectionState>> = {
            let databases = self.inner.databases.read().await;
            databases
                .values()
                .flat_map(|collections| collections.values().cloned())
                .collect()
        };

        let mut removed = 0;
        for state in collections {
            removed += sweep(&state).await;
        }
        removed
    }

    /// Names of the collections that exist in `database`.
    pub async fn collection_names(&self, database: &str) -> Vec<String> {
        let databases = self.inner.databases.read().await;
        let mut names: Vec<String> = databases
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    async fn bind(&self, database: &str, name: &str) -> Arc<CollectionState> {
        let mut databases = self.inner.databases.write().await;
        databases
            .entry(database.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn writes_fail(&self) -> bool {
        self.inner.faults.fail_writes.load(Ordering::SeqCst)
    }

    fn reads_fail(&self) -> bool {
        self.inner.faults.fail_reads.load(Ordering::SeqCst)
    }

    fn refuses_connections(&self) -> bool {
        self.inner.faults.refuse_connections.load(Ordering::SeqCst)
    }
}

async fn sweep(state: &CollectionState) -> u64 {
    let now = Utc::now();
    let mut documents = state.documents.write().await;
    let before = documents.len();
    documents.retain(|doc| !doc.is_expired_at(now));
    (before - documents.len()) as u64
}

// ============================================================================
// STORE
// ============================================================================

/// One collection of a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    metadata: CollectionMetadata,
    state: Arc<CollectionState>,
    cluster: MemoryCluster,
    open: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    /// Remove documents whose `expireAt` has passed. Returns documents removed.
    pub async fn sweep_expired(&self) -> u64 {
        sweep(&self.state).await
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::ConnectionClosed)
        }
    }

    fn check_read(&self) -> StorageResult<()> {
        self.check_open()?;
        if self.cluster.reads_fail() {
            return Err(StorageError::Query {
                collection: self.metadata.name.clone(),
                reason: "injected read failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_write(&self, id: &str) -> StorageResult<()> {
        self.check_open()?;
        if self.cluster.writes_fail() {
            return Err(StorageError::Write {
                collection: self.metadata.name.clone(),
                id: id.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Document>> {
        self.check_read()?;
        let documents = self.state.documents.read().await;
        Ok(documents.iter().find(|doc| doc.id == id).cloned())
    }

    async fn find_all(&self) -> StorageResult<Vec<Document>> {
        self.check_read()?;
        Ok(self.state.documents.read().await.clone())
    }

    async fn estimated_count(&self) -> StorageResult<u64> {
        self.check_read()?;
        Ok(self.state.documents.read().await.len() as u64)
    }

    async fn create_document(&self, document: NewDocument) -> StorageResult<Document> {
        self.check_write(&document.id)?;
        let mut documents = self.state.documents.write().await;
        if documents.iter().any(|doc| doc.id == document.id) {
            return Err(StorageError::DuplicateId {
                collection: self.metadata.name.clone(),
                id: document.id,
            });
        }
        let document = document.into_document(Utc::now());
        documents.push(document.clone());
        Ok(document)
    }

    async fn update_document(&self, id: &str, patch: DocumentPatch) -> StorageResult<bool> {
        self.check_write(id)?;
        let mut documents = self.state.documents.write().await;
        match documents.iter_mut().find(|doc| doc.id == id) {
            Some(document) => {
                patch.apply(document, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, id: &str) -> StorageResult<u64> {
        self.check_write(id)?;
        let mut documents = self.state.documents.write().await;
        match documents.iter().position(|doc| doc.id == id) {
            Some(index) => {
                documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self) -> StorageResult<u64> {
        self.check_write("*")?;
        let mut documents = self.state.documents.write().await;
        let removed = documents.len() as u64;
        documents.clear();
        Ok(removed)
    }

    async fn drop_collection(&self) -> StorageResult<()> {
        self.check_write("*")?;
        self.state.documents.write().await.clear();
        Ok(())
    }

    fn metadata(&self) -> CollectionMetadata {
        self.metadata.clone()
    }

    async fn stats(&self) -> StorageResult<CollectionStats> {
        self.check_read()?;
        let documents = self.state.documents.read().await;
        let mut size = 0u64;
        for document in documents.iter() {
            let encoded = serde_json::to_vec(document).map_err(|e| StorageError::Query {
                collection: self.metadata.name.clone(),
                reason: e.to_string(),
            })?;
            size += encoded.len() as u64;
        }
        Ok(CollectionStats::new(
            self.metadata.namespace.clone(),
            documents.len() as u64,
            size,
            MEMORY_INDEX_COUNT,
        ))
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// Connection to one database of a [`MemoryCluster`].
///
/// The first subscriber also receives the events emitted while connecting.
pub struct MemoryConnection {
    cluster: MemoryCluster,
    database: String,
    open: Arc<AtomicBool>,
    events: broadcast::Sender<LifecycleEvent>,
    handshake: Mutex<Option<broadcast::Receiver<LifecycleEvent>>>,
}

impl MemoryConnection {
    fn open(cluster: MemoryCluster, database: String) -> Self {
        let (events, handshake) = broadcast::channel(EVENT_CAPACITY);
        let connection = Self {
            cluster,
            database,
            open: Arc::new(AtomicBool::new(true)),
            events,
            handshake: Mutex::new(Some(handshake)),
        };
        connection.emit(LifecycleEvent::Connecting);
        connection.emit(LifecycleEvent::Connected);
        connection.emit(LifecycleEvent::Open);
        connection
    }

    /// Emit an event as if the server reported it.
    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    /// Typed access to a collection, for sweeping and out-of-band edits.
    pub async fn memory_collection(&self, name: &str) -> InMemoryDocumentStore {
        InMemoryDocumentStore {
            metadata: CollectionMetadata::new(self.database.clone(), name),
            state: self.cluster.bind(&self.database, name).await,
            cluster: self.cluster.clone(),
            open: Arc::clone(&self.open),
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn collection(&self, name: &str) -> StorageResult<Arc<dyn DocumentStore>> {
        if !self.is_open() {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(Arc::new(self.memory_collection(name).await))
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        let buffered = self
            .handshake
            .lock()
            .ok()
            .and_then(|mut handshake| handshake.take());
        buffered.unwrap_or_else(|| self.events.subscribe())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self, _force: bool) -> StorageResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit(LifecycleEvent::Disconnecting);
        self.emit(LifecycleEvent::Disconnected);
        self.emit(LifecycleEvent::Close);
        tracing::debug!(database = %self.database, "Memory connection closed");
        Ok(())
    }

    fn database_name(&self) -> &str {
        &self.database
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Opens [`MemoryConnection`]s on a shared cluster.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
}

impl MemoryConnector {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Concrete connection, for tests that need [`MemoryConnection`] helpers.
    pub fn connect_memory(&self, url: &str) -> StorageResult<MemoryConnection> {
        if url.trim().is_empty() || self.cluster.refuses_connections() {
            return Err(StorageError::Connection {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let database = database_name_from_url(url);
        tracing::debug!(url = %url, database = %database, "Opening memory connection");
        Ok(MemoryConnection::open(self.cluster.clone(), database))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> StorageResult<Arc<dyn StoreConnection>> {
        Ok(Arc::new(self.connect_memory(url)?))
    }
}

// ============================================================================
// TESTS
// ============================================================================
