//! Database handle: lifecycle, derivation and shared plumbing.
//!
//! A [`Database`] is bound to one collection. It moves through
//! `Uninitialized -> Connecting -> Ready -> Closed`; every key operation
//! checks for `Ready` first. Handles derived with
//! [`Database::instantiate_child`] or [`Database::open_table`] either share
//! the parent's live connection or open their own, and always get their own
//! cache namespace on the parent's cache backend.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use quickdoc_core::{
    CollectionMetadata, CollectionStats, ConnectionState, DatabaseOptions, Document,
    DocumentPatch, Entry, EventKind, ExpiryUpdate, LifecycleEvent, NewDocument, QuickDocError,
    QuickDocResult, StorageResult, Timestamp, WriteErrorPolicy, DEFAULT_COLLECTION,
};
use quickdoc_storage::{
    build_backend, CacheLayer, CacheStats, Connector, DocumentStore, MemoryConnector,
    StoreConnection, TtlSet, WriteOrigin,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::events::EventBus;
use crate::locks::{KeyGuard, KeyLocks};

/// Root key read by [`Database::ping`].
pub const PING_KEY: &str = "__quickdoc_ping__";

/// How a handle came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleRole {
    /// Built with [`Database::new`].
    Root,
    /// Built with [`Database::instantiate_child`].
    Child,
    /// Built with [`Database::open_table`].
    Table,
}

// ============================================================================
// BINDING
// ============================================================================

/// Everything a ready handle talks to.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) connection: Arc<dyn StoreConnection>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) cache: CacheLayer,
}

/// Cache access with failures downgraded to log lines.
///
/// The store is authoritative, so a broken cache costs latency, never
/// correctness.
impl Binding {
    /// The bound collection's `database.collection` namespace.
    pub(crate) fn collection(&self) -> &str {
        self.cache.namespace()
    }

    pub(crate) async fn cached(&self, root_key: &str) -> Option<Value> {
        match self.cache.read(root_key).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(collection = %self.collection(), key = %root_key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub(crate) async fn cache_put(&self, root_key: &str, payload: Value, expire_at: Option<Timestamp>) {
        if let Err(e) = self
            .cache
            .write(root_key, payload, expire_at, WriteOrigin::Single)
            .await
        {
            error!(collection = %self.collection(), key = %root_key, error = %e, "Cache write failed");
        }
    }

    pub(crate) async fn cache_drop(&self, root_key: &str) {
        if let Err(e) = self.cache.remove(root_key).await {
            error!(collection = %self.collection(), key = %root_key, error = %e, "Cache removal failed");
        }
    }

    pub(crate) async fn cache_clear(&self) {
        if let Err(e) = self.cache.clear().await {
            error!(collection = %self.collection(), error = %e, "Cache clear failed");
        }
    }

    pub(crate) async fn cached_snapshot(&self) -> Option<Vec<Entry>> {
        match self.cache.read_snapshot().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(collection = %self.collection(), error = %e, "Snapshot read failed");
                None
            }
        }
    }

    pub(crate) async fn cache_snapshot(&self, entries: &[Entry]) {
        if let Err(e) = self.cache.write_snapshot(entries).await {
            error!(collection = %self.collection(), error = %e, "Snapshot write failed");
        }
    }

    pub(crate) async fn cached_latency(&self) -> Option<u64> {
        match self.cache.read_probe().await {
            Ok(latency) => latency,
            Err(e) => {
                error!(collection = %self.collection(), error = %e, "Probe read failed");
                None
            }
        }
    }

    pub(crate) async fn record_latency(&self, elapsed: Duration) {
        let latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if let Err(e) = self.cache.write_probe(latency_ms).await {
            error!(collection = %self.collection(), error = %e, "Probe write failed");
        }
    }
}

// ============================================================================
// DATABASE
// ============================================================================

struct Lifecycle {
    state: ConnectionState,
    binding: Option<Binding>,
    /// Task forwarding the connection's events onto this handle's bus.
    relay: Option<JoinHandle<()>>,
}

struct Inner {
    url: String,
    options: DatabaseOptions,
    connector: Arc<dyn Connector>,
    role: HandleRole,
    parent: Option<Database>,
    owns_connection: bool,
    lifecycle: RwLock<Lifecycle>,
    events: EventBus,
    locks: KeyLocks,
}

/// Key-value handle over one collection.
///
/// Cloning is cheap and yields another handle on the same state.
///
/// # Example
///
/// ```ignore
/// let db = Database::new("memory://localhost/app", DatabaseOptions::default(), connector);
/// db.connect().await?;
///
/// db.set("user.profile.name", json!("ada")).await?;
/// assert_eq!(db.get("user.profile", false).await?, Some(json!({ "name": "ada" })));
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collection", &self.inner.options.collection_name)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}

impl Database {
    /// Create an unconnected handle. Nothing is opened until
    /// [`Database::connect`].
    pub fn new(
        url: impl Into<String>,
        options: DatabaseOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::build(url.into(), options, connector, HandleRole::Root, None, KeyLocks::new(), true)
    }

    /// Handle over an in-process store. Handles created from one
    /// `connector` see the same data.
    pub fn in_memory(
        url: impl Into<String>,
        options: DatabaseOptions,
        connector: MemoryConnector,
    ) -> Self {
        Self::new(url, options, Arc::new(connector))
    }

    /// Handle over a MongoDB deployment.
    #[cfg(feature = "mongodb")]
    pub fn mongo(url: impl Into<String>, options: DatabaseOptions) -> Self {
        Self::new(url, options, Arc::new(quickdoc_storage::MongoConnector))
    }

    fn build(
        url: String,
        options: DatabaseOptions,
        connector: Arc<dyn Connector>,
        role: HandleRole,
        parent: Option<Database>,
        locks: KeyLocks,
        owns_connection: bool,
    ) -> Self {
        let events = EventBus::new(options.event_capacity);
        Self {
            inner: Arc::new(Inner {
                url,
                options,
                connector,
                role,
                parent,
                owns_connection,
                lifecycle: RwLock::new(Lifecycle {
                    state: ConnectionState::Uninitialized,
                    binding: None,
                    relay: None,
                }),
                events,
                locks,
            }),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open the connection, bind the collection and become `Ready`.
    ///
    /// Calling this on a ready handle is a no-op. A failed attempt returns
    /// the handle to `Uninitialized` so it can be retried; a closed handle
    /// stays closed.
    pub async fn connect(&self) -> QuickDocResult<()> {
        if self.inner.url.trim().is_empty() {
            return Err(QuickDocError::MissingUrl);
        }
        self.inner.options.validate()?;
        if !self.begin_connect()? {
            return Ok(());
        }

        info!(
            url = %self.inner.url,
            collection = %self.collection_name(),
            "Connecting"
        );

        let connection = match self.inner.connector.connect(&self.inner.url).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.abort_connect(e.into())),
        };

        self.bind(connection).await
    }

    /// Close the handle. The connection is closed only if this handle opened
    /// it; handles sharing a parent's connection just stop serving and stop
    /// relaying the connection's events.
    ///
    /// An owning handle keeps its relay until the connection's event source
    /// ends, so the close events still reach its subscribers.
    pub async fn close(&self, force: bool) -> QuickDocResult<()> {
        let (binding, relay) = {
            let mut lifecycle = self.write_lifecycle();
            if lifecycle.state == ConnectionState::Closed {
                return Ok(());
            }
            lifecycle.state = ConnectionState::Closed;
            (lifecycle.binding.take(), lifecycle.relay.take())
        };

        if !self.inner.owns_connection {
            if let Some(relay) = relay {
                relay.abort();
            }
        }
        if let Some(binding) = binding {
            if self.inner.owns_connection {
                binding.connection.close(force).await?;
            }
        }
        info!(collection = %self.collection_name(), force, "Database closed");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.read_lifecycle().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Numeric state: 0 uninitialized, 2 connecting, 1 ready, 3 closed.
    pub fn ready_state(&self) -> u8 {
        self.state().code()
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn collection_name(&self) -> &str {
        &self.inner.options.collection_name
    }

    pub fn role(&self) -> HandleRole {
        self.inner.role
    }

    /// True for handles derived from another handle.
    pub fn is_child(&self) -> bool {
        self.inner.parent.is_some()
    }

    pub fn is_parent(&self) -> bool {
        !self.is_child()
    }

    pub fn parent(&self) -> Option<&Database> {
        self.inner.parent.as_ref()
    }

    /// Name, database and namespace of the bound collection.
    pub fn metadata(&self) -> QuickDocResult<CollectionMetadata> {
        Ok(self.binding()?.store.metadata())
    }

    /// Count and size figures of the bound collection, from the store.
    pub async fn stats(&self) -> QuickDocResult<CollectionStats> {
        let binding = self.binding()?;
        Ok(binding.store.stats().await?)
    }

    /// Statistics of the cache backend. Derived handles share the backend,
    /// so these cover them too.
    pub async fn cache_stats(&self) -> QuickDocResult<CacheStats> {
        let binding = self.binding()?;
        Ok(binding.cache.backend().stats().await?)
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Receive every future lifecycle event of this handle.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Call `handler` for every future event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    // ========================================================================
    // DERIVATION
    // ========================================================================

    /// Handle on another collection.
    ///
    /// Without `url` the child shares this handle's live connection and is
    /// ready on return; this handle must be ready. With `url` the child
    /// connects on its own through the same connector. `collection`
    /// defaults to `JSON`.
    pub async fn instantiate_child(
        &self,
        collection: Option<&str>,
        url: Option<&str>,
    ) -> QuickDocResult<Database> {
        let collection = collection
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_COLLECTION);

        let Some(url) = url else {
            return self.derive_shared(collection, HandleRole::Child).await;
        };

        let child = Self::build(
            url.to_string(),
            self.inner.options.clone().with_collection(collection),
            Arc::clone(&self.inner.connector),
            HandleRole::Child,
            Some(self.clone()),
            self.inner.locks.clone(),
            true,
        );
        child.connect().await?;
        info!(collection, url, "Child database connected");
        Ok(child)
    }

    /// Handle on collection `name` sharing this handle's connection.
    ///
    /// Fails with `TableNameRequired` for an empty name,
    /// `ParentHasNoConnection` if this handle is not ready and
    /// `TableNotInvocable` when called on a table.
    pub async fn open_table(&self, name: &str) -> QuickDocResult<Database> {
        if self.inner.role == HandleRole::Table {
            return Err(QuickDocError::TableNotInvocable);
        }
        if name.trim().is_empty() {
            return Err(QuickDocError::TableNameRequired);
        }
        self.derive_shared(name, HandleRole::Table).await
    }

    async fn derive_shared(&self, collection: &str, role: HandleRole) -> QuickDocResult<Database> {
        let parent = self
            .binding()
            .map_err(|_| QuickDocError::ParentHasNoConnection)?;

        let options = self.inner.options.clone().with_collection(collection);
        let derived = Self::build(
            self.inner.url.clone(),
            options,
            Arc::clone(&self.inner.connector),
            role,
            Some(self.clone()),
            self.inner.locks.clone(),
            false,
        );

        derived.begin_connect()?;
        derived.bind(parent.connection).await?;
        info!(collection, role = ?role, "Derived database bound to parent connection");
        Ok(derived)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Move to `Connecting`. Returns false if already ready.
    fn begin_connect(&self) -> QuickDocResult<bool> {
        let mut lifecycle = self.write_lifecycle();
        match lifecycle.state {
            ConnectionState::Uninitialized => {
                lifecycle.state = ConnectionState::Connecting;
                Ok(true)
            }
            ConnectionState::Ready => Ok(false),
            state => Err(QuickDocError::NotReady { state }),
        }
    }

    fn abort_connect(&self, error: QuickDocError) -> QuickDocError {
        {
            let mut lifecycle = self.write_lifecycle();
            if lifecycle.state == ConnectionState::Connecting {
                lifecycle.state = ConnectionState::Uninitialized;
            }
        }
        error!(url = %self.inner.url, error = %error, "Connect failed");
        self.inner.events.emit(LifecycleEvent::Error(error.to_string()));
        error
    }

    /// Cache layer for the collection `namespace`: the parent's backend when
    /// there is a ready parent, a new backend otherwise.
    ///
    /// `namespace` is the store's `database.collection`, so handles on
    /// different databases never read each other's rows.
    fn open_cache(&self, namespace: String) -> QuickDocResult<CacheLayer> {
        let options = &self.inner.options;
        let ttl = TtlSet::from(options.ttl);
        if let Some(parent) = self.inner.parent.as_ref().and_then(|p| p.binding().ok()) {
            return Ok(parent.cache.derive(namespace, ttl));
        }
        let backend = build_backend(&options.cache)?;
        Ok(CacheLayer::new(backend, namespace, ttl))
    }

    /// Bind the collection on `connection` and become `Ready`. On failure an
    /// owned connection is closed again.
    async fn bind(&self, connection: Arc<dyn StoreConnection>) -> QuickDocResult<()> {
        let bound = match connection.collection(self.collection_name()).await {
            Ok(store) => {
                let namespace = store.metadata().namespace;
                self.open_cache(namespace).map(|cache| (store, cache))
            }
            Err(e) => Err(e.into()),
        };
        let (store, cache) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                if self.inner.owns_connection {
                    if let Err(close_error) = connection.close(true).await {
                        debug!(error = %close_error, "Closing after a failed bind also failed");
                    }
                }
                return Err(self.abort_connect(e));
            }
        };

        let relay = self.inner.events.relay_from(connection.subscribe());

        {
            let mut lifecycle = self.write_lifecycle();
            if lifecycle.state != ConnectionState::Connecting {
                relay.abort();
                return Err(QuickDocError::NotReady {
                    state: lifecycle.state,
                });
            }
            lifecycle.binding = Some(Binding {
                connection,
                store,
                cache,
            });
            lifecycle.relay = Some(relay);
            lifecycle.state = ConnectionState::Ready;
        }

        info!(collection = %self.collection_name(), "Database ready");
        self.inner.events.emit(LifecycleEvent::Ready);
        Ok(())
    }

    /// The live binding, or `NotReady`.
    pub(crate) fn binding(&self) -> QuickDocResult<Binding> {
        let lifecycle = self.read_lifecycle();
        match (&lifecycle.binding, lifecycle.state) {
            (Some(binding), ConnectionState::Ready) => Ok(binding.clone()),
            (_, state) => Err(QuickDocError::NotReady { state }),
        }
    }

    pub(crate) async fn lock_root(&self, binding: &Binding, root_key: &str) -> KeyGuard {
        self.inner.locks.lock(binding.collection(), root_key).await
    }

    /// The stored document for `root_key`, unless absent or expired.
    pub(crate) async fn load_live(
        &self,
        binding: &Binding,
        root_key: &str,
    ) -> QuickDocResult<Option<Document>> {
        let document = binding.store.find_by_id(root_key).await?;
        Ok(document.filter(|doc| !doc.is_expired()))
    }

    /// Write `data` as the root payload of `root_key` and refresh the cache.
    ///
    /// `existing` is the live document, if any. Without one, an expired
    /// leftover may still be stored, so the write updates first and creates
    /// only when nothing matched, and a kept expiry is cleared.
    ///
    /// Returns false when a store failure was swallowed.
    pub(crate) async fn persist(
        &self,
        binding: &Binding,
        root_key: &str,
        data: Value,
        expiry: ExpiryUpdate,
        existing: Option<&Document>,
    ) -> QuickDocResult<bool> {
        let expiry = match (expiry, existing) {
            (ExpiryUpdate::Keep, None) => ExpiryUpdate::Set(None),
            (expiry, _) => expiry,
        };
        let expire_at = match expiry {
            ExpiryUpdate::Set(at) => at,
            ExpiryUpdate::Keep => existing.and_then(|doc| doc.expire_at),
        };

        let patch = DocumentPatch {
            data: data.clone(),
            expire_at: expiry,
        };
        let updated = binding.store.update_document(root_key, patch).await;
        let Some(matched) = self.absorb_write(binding, root_key, updated)? else {
            return Ok(false);
        };

        if !matched {
            let document = NewDocument::new(root_key, data.clone()).with_expiry(expire_at);
            let created = binding.store.create_document(document).await;
            if self.absorb_write(binding, root_key, created)?.is_none() {
                return Ok(false);
            }
        }

        binding.cache_put(root_key, data, expire_at).await;
        Ok(true)
    }

    /// Apply the write error policy to a store write result.
    ///
    /// `Ok(None)` means the failure was logged and swallowed.
    pub(crate) fn absorb_write<T>(
        &self,
        binding: &Binding,
        key: &str,
        result: StorageResult<T>,
    ) -> QuickDocResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self.inner.options.write_errors {
                WriteErrorPolicy::Propagate => Err(e.into()),
                WriteErrorPolicy::Swallow => {
                    error!(
                        collection = %binding.collection(),
                        key = %key,
                        error = %e,
                        "Store write failed"
                    );
                    Ok(None)
                }
            },
        }
    }

    fn read_lifecycle(&self) -> std::sync::RwLockReadGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lifecycle(&self) -> std::sync::RwLockWriteGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
