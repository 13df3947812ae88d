//! MongoDB document store.
//!
//! Each document is stored as `{ID, data, expireAt, createdAt, updatedAt}`
//! with a unique index on `ID` and a TTL index on `expireAt` so the server
//! purges expired documents on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use quickdoc_core::{
    CollectionMetadata, CollectionStats, Document, DocumentPatch, ExpiryUpdate, LifecycleEvent,
    NewDocument, StorageError, StorageResult, Timestamp,
};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::memory::database_name_from_url;
use crate::store::{Connector, DocumentStore, StoreConnection};

const EVENT_CAPACITY: usize = 64;
const DUPLICATE_KEY: i32 = 11000;

// ============================================================================
// CONVERSION
// ============================================================================

fn to_bson_datetime(at: Timestamp) -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(at))
}

fn optional_datetime(at: Option<Timestamp>) -> Bson {
    at.map(to_bson_datetime).unwrap_or(Bson::Null)
}

fn encode(collection: &str, document: &Document) -> StorageResult<bson::Document> {
    let data = bson::to_bson(&document.data).map_err(|e| StorageError::Write {
        collection: collection.to_string(),
        id: document.id.clone(),
        reason: e.to_string(),
    })?;

    Ok(doc! {
        "ID": document.id.as_str(),
        "data": data,
        "expireAt": optional_datetime(document.expire_at),
        "createdAt": to_bson_datetime(document.created_at),
        "updatedAt": to_bson_datetime(document.updated_at),
    })
}

fn decode(collection: &str, raw: bson::Document) -> StorageResult<Document> {
    let malformed = |reason: String| StorageError::Query {
        collection: collection.to_string(),
        reason,
    };

    let id = raw
        .get_str("ID")
        .map_err(|e| malformed(format!("document without ID: {e}")))?
        .to_string();
    let data = raw
        .get("data")
        .cloned()
        .unwrap_or(Bson::Null)
        .into_relaxed_extjson();
    let timestamp = |field: &str| match raw.get(field) {
        Some(Bson::DateTime(at)) => Some(at.to_chrono()),
        _ => None,
    };
    let now = Utc::now();

    Ok(Document {
        id,
        data,
        expire_at: timestamp("expireAt"),
        created_at: timestamp("createdAt").unwrap_or(now),
        updated_at: timestamp("updatedAt").unwrap_or(now),
    })
}

fn patch_update(collection: &str, id: &str, patch: &DocumentPatch) -> StorageResult<bson::Document> {
    let data = bson::to_bson(&patch.data).map_err(|e| StorageError::Write {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })?;

    let mut set = doc! {
        "data": data,
        "updatedAt": to_bson_datetime(Utc::now()),
    };
    if let ExpiryUpdate::Set(expire_at) = patch.expire_at {
        set.insert("expireAt", optional_datetime(expire_at));
    }
    Ok(doc! { "$set": set })
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

// ============================================================================
// STORE
// ============================================================================

/// One MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    inner: Collection<bson::Document>,
    database: mongodb::Database,
    metadata: CollectionMetadata,
}

impl MongoDocumentStore {
    async fn new(client: &Client, database: &str, name: &str) -> StorageResult<Self> {
        let handle = client.database(database);
        let store = Self {
            inner: handle.collection::<bson::Document>(name),
            database: handle,
            metadata: CollectionMetadata::new(database, name),
        };
        store.apply_indexes().await?;
        Ok(store)
    }

    async fn apply_indexes(&self) -> StorageResult<()> {
        let indices = vec![
            IndexModel::builder()
                .keys(doc! { "ID": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder()
                .keys(doc! { "expireAt": 1 })
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                )
                .build(),
        ];

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn query_error(&self, e: mongodb::error::Error) -> StorageError {
        StorageError::Query {
            collection: self.name().to_string(),
            reason: e.to_string(),
        }
    }

    fn write_error(&self, id: &str, e: mongodb::error::Error) -> StorageError {
        StorageError::Write {
            collection: self.name().to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Document>> {
        let found = self
            .inner
            .find_one(doc! { "ID": id })
            .await
            .map_err(|e| self.query_error(e))?;
        found.map(|raw| decode(self.name(), raw)).transpose()
    }

    async fn find_all(&self) -> StorageResult<Vec<Document>> {
        let cursor = self
            .inner
            .find(doc! {})
            .await
            .map_err(|e| self.query_error(e))?;
        let raw: Vec<bson::Document> = cursor
            .try_collect()
            .await
            .map_err(|e| self.query_error(e))?;
        raw.into_iter().map(|doc| decode(self.name(), doc)).collect()
    }

    async fn estimated_count(&self) -> StorageResult<u64> {
        self.inner
            .estimated_document_count()
            .await
            .map_err(|e| self.query_error(e))
    }

    async fn create_document(&self, document: NewDocument) -> StorageResult<Document> {
        let document = document.into_document(Utc::now());
        let raw = encode(self.name(), &document)?;
        match self.inner.insert_one(raw).await {
            Ok(_) => Ok(document),
            Err(e) if is_duplicate_key(&e) => Err(StorageError::DuplicateId {
                collection: self.name().to_string(),
                id: document.id,
            }),
            Err(e) => Err(self.write_error(&document.id, e)),
        }
    }

    async fn update_document(&self, id: &str, patch: DocumentPatch) -> StorageResult<bool> {
        let update = patch_update(self.name(), id, &patch)?;
        let result = self
            .inner
            .update_one(doc! { "ID": id }, update)
            .await
            .map_err(|e| self.write_error(id, e))?;
        Ok(result.matched_count > 0)
    }

    async fn delete_one(&self, id: &str) -> StorageResult<u64> {
        let result = self
            .inner
            .delete_one(doc! { "ID": id })
            .await
            .map_err(|e| self.write_error(id, e))?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self) -> StorageResult<u64> {
        let result = self
            .inner
            .delete_many(doc! {})
            .await
            .map_err(|e| self.write_error("*", e))?;
        Ok(result.deleted_count)
    }

    async fn drop_collection(&self) -> StorageResult<()> {
        self.inner
            .drop()
            .await
            .map_err(|e| self.write_error("*", e))
    }

    fn metadata(&self) -> CollectionMetadata {
        self.metadata.clone()
    }

    async fn stats(&self) -> StorageResult<CollectionStats> {
        let reply = self
            .database
            .run_command(doc! { "collStats": self.name() })
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(stats_from_reply(&self.metadata.namespace, &reply))
    }
}

/// Read the figures of a `collStats` reply. Missing fields count as 0.
fn stats_from_reply(namespace: &str, reply: &bson::Document) -> CollectionStats {
    let number = |field: &str| match reply.get(field) {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Double(n)) if n.is_finite() && *n > 0.0 => *n as u64,
        _ => 0,
    };
    CollectionStats::new(namespace, number("count"), number("size"), number("nindexes"))
}

// ============================================================================
// CONNECTION
// ============================================================================

/// Live MongoDB client bound to one database.
///
/// The first subscriber also receives the events emitted while connecting.
pub struct MongoConnection {
    client: Client,
    database: String,
    open: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
    handshake: Mutex<Option<broadcast::Receiver<LifecycleEvent>>>,
}

impl MongoConnection {
    /// Connect and verify the server answers a ping.
    pub async fn open(url: &str) -> StorageResult<Self> {
        let (events, handshake) = broadcast::channel(EVENT_CAPACITY);
        let _ = events.send(LifecycleEvent::Connecting);

        info!(url = %url, "Connecting to MongoDB");
        let connection_error = |e: mongodb::error::Error| StorageError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let client = Client::with_uri_str(url).await.map_err(connection_error)?;
        let database = client
            .default_database()
            .map(|db| db.name().to_string())
            .unwrap_or_else(|| database_name_from_url(url));

        if let Err(e) = client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
        {
            error!(url = %url, error = %e, "MongoDB ping failed");
            return Err(connection_error(e));
        }

        let _ = events.send(LifecycleEvent::Connected);
        let _ = events.send(LifecycleEvent::Open);
        info!(database = %database, "Connected to MongoDB");

        Ok(Self {
            client,
            database,
            open: AtomicBool::new(true),
            events,
            handshake: Mutex::new(Some(handshake)),
        })
    }

    /// The raw driver client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl StoreConnection for MongoConnection {
    async fn collection(&self, name: &str) -> StorageResult<Arc<dyn DocumentStore>> {
        if !self.is_open() {
            return Err(StorageError::ConnectionClosed);
        }
        Ok(Arc::new(
            MongoDocumentStore::new(&self.client, &self.database, name).await?,
        ))
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

    async fn close(&self, force: bool) -> StorageResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.events.send(LifecycleEvent::Disconnecting);
        self.client.clone().shutdown().immediate(force).await;
        let _ = self.events.send(LifecycleEvent::Disconnected);
        let _ = self.events.send(LifecycleEvent::Close);
        info!(database = %self.database, "MongoDB connection closed");
        Ok(())
    }

    fn database_name(&self) -> &str {
        &self.database
    }
}

/// Opens [`MongoConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, url: &str) -> StorageResult<Arc<dyn StoreConnection>> {
        Ok(Arc::new(MongoConnection::open(url).await?))
    }
}
