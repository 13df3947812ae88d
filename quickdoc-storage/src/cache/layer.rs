//! Cache layer over one backend and one namespace.
//!
//! The layer owns TTL bookkeeping per entry class and the payload codec.
//! It caches root payloads (a document's `data`, never the whole document),
//! the full collection listing, and the last measured store latency.
//!
//! # Snapshot coherence
//!
//! Single-key writes patch the cached listing in place (replace by ID or
//! append) so listings stay coherent without a rescan. Patching keeps the
//! listing's original `cached_at`: a single write never extends how long a
//! listing counts as fresh. Removals leave the listing alone until the next
//! scan.

use std::sync::Arc;

use chrono::Utc;
use quickdoc_core::{CacheError, CacheResult, Entry, Timestamp};
use serde_json::Value;
use tracing::debug;

use super::namespace::NamespacedKey;
use super::traits::{CacheBackend, CacheEnvelope, CachePayload};
use super::ttl::TtlSet;

/// Payload encoding, fixed per layer at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Envelopes stored as-is.
    Native,
    /// Envelopes stored as JSON text.
    Text,
}

/// Where a single-key write comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A write or fetch of one document; patches the listing.
    Single,
    /// Warming from a full scan; the listing is written separately.
    Snapshot,
}

/// Namespaced, TTL-aware cache over a shared backend.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl: TtlSet,
    codec: Codec,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("codec", &self.codec)
            .finish()
    }
}

impl CacheLayer {
    /// Create a layer. The codec follows `backend.requires_text()`.
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>, ttl: TtlSet) -> Self {
        let codec = if backend.requires_text() {
            Codec::Text
        } else {
            Codec::Native
        };
        Self {
            backend,
            namespace: namespace.into(),
            ttl,
            codec,
        }
    }

    /// Another layer on the same backend with its own namespace and TTLs.
    pub fn derive(&self, namespace: impl Into<String>, ttl: TtlSet) -> Self {
        Self::new(Arc::clone(&self.backend), namespace, ttl)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> &TtlSet {
        &self.ttl
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    // ========================================================================
    // SINGLE KEYS
    // ========================================================================

    /// Cached root payload for `root_key`, if fresh.
    ///
    /// Misses when the class is disabled, the entry is older than its
    /// window, or the cached document's own expiry has passed.
    pub async fn read(&self, root_key: &str) -> CacheResult<Option<Value>> {
        let key = NamespacedKey::entry(&self.namespace, root_key);
        let envelope = self.read_fresh(&key).await?;
        Ok(envelope.map(|envelope| envelope.payload))
    }

    /// Cache `payload` as the root payload of `root_key`.
    ///
    /// With [`WriteOrigin::Single`] the cached listing, if any, is patched.
    pub async fn write(
        &self,
        root_key: &str,
        payload: Value,
        expires_at: Option<Timestamp>,
        origin: WriteOrigin,
    ) -> CacheResult<()> {
        if self.ttl.read.is_enabled() {
            let key = NamespacedKey::entry(&self.namespace, root_key);
            let envelope = CacheEnvelope::new(payload.clone(), Utc::now(), expires_at);
            self.store(&key, envelope).await?;
        }

        if origin == WriteOrigin::Single {
            self.patch_snapshot(Entry {
                id: root_key.to_string(),
                data: payload,
                expire_at: expires_at,
            })
            .await?;
        }
        Ok(())
    }

    /// Drop the cached root payload of `root_key`. The listing is untouched.
    pub async fn remove(&self, root_key: &str) -> CacheResult<bool> {
        let key = NamespacedKey::entry(&self.namespace, root_key);
        self.backend.delete(&key.encode()).await
    }

    /// Drop every entry of this layer's namespace.
    pub async fn clear(&self) -> CacheResult<u64> {
        let removed = self
            .backend
            .clear_prefix(&NamespacedKey::namespace_prefix(&self.namespace))
            .await?;
        debug!(namespace = %self.namespace, removed, "Cache namespace cleared");
        Ok(removed)
    }

    // ========================================================================
    // SNAPSHOT
    // ========================================================================

    /// Cached listing, if fresh, without rows whose documents have expired.
    pub async fn read_snapshot(&self) -> CacheResult<Option<Vec<Entry>>> {
        let key = NamespacedKey::snapshot(&self.namespace);
        let Some(envelope) = self.read_fresh(&key).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let entries = decode_entries(&key, envelope.payload)?;
        Ok(Some(
            entries
                .into_iter()
                .filter(|entry| !entry.is_expired_at(now))
                .collect(),
        ))
    }

    /// Cache a full listing and warm every row's single-key entry.
    pub async fn write_snapshot(&self, entries: &[Entry]) -> CacheResult<()> {
        if !self.ttl.snapshot.is_enabled() {
            return Ok(());
        }

        let key = NamespacedKey::snapshot(&self.namespace);
        let payload = encode_entries(&key, entries)?;
        self.store(&key, CacheEnvelope::new(payload, Utc::now(), None))
            .await?;

        for entry in entries {
            self.write(&entry.id, entry.data.clone(), entry.expire_at, WriteOrigin::Snapshot)
                .await?;
        }
        debug!(namespace = %self.namespace, rows = entries.len(), "Snapshot repopulated");
        Ok(())
    }

    async fn patch_snapshot(&self, row: Entry) -> CacheResult<()> {
        if !self.ttl.snapshot.is_enabled() {
            return Ok(());
        }

        let key = NamespacedKey::snapshot(&self.namespace);
        let Some(envelope) = self.load(&key).await? else {
            return Ok(());
        };

        let mut entries = decode_entries(&key, envelope.payload)?;
        match entries.iter_mut().find(|entry| entry.id == row.id) {
            Some(existing) => *existing = row,
            None => entries.push(row),
        }

        let payload = encode_entries(&key, &entries)?;
        self.store(&key, CacheEnvelope::new(payload, envelope.cached_at, None))
            .await
    }

    // ========================================================================
    // PROBE
    // ========================================================================

    /// Cached store latency in milliseconds, if fresh.
    pub async fn read_probe(&self) -> CacheResult<Option<u64>> {
        let key = NamespacedKey::probe(&self.namespace);
        let envelope = self.read_fresh(&key).await?;
        Ok(envelope.and_then(|envelope| envelope.payload.as_u64()))
    }

    /// Cache a measured store latency.
    pub async fn write_probe(&self, latency_ms: u64) -> CacheResult<()> {
        if !self.ttl.probe.is_enabled() {
            return Ok(());
        }
        let key = NamespacedKey::probe(&self.namespace);
        self.store(&key, CacheEnvelope::new(Value::from(latency_ms), Utc::now(), None))
            .await
    }

    // ========================================================================
    // CODEC
    // ========================================================================

    async fn read_fresh(&self, key: &NamespacedKey) -> CacheResult<Option<CacheEnvelope>> {
        let window = self.ttl.window(key.class());
        if !window.is_enabled() {
            return Ok(None);
        }

        let Some(envelope) = self.load(key).await? else {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        };

        let now = Utc::now();
        if !window.is_fresh(envelope.cached_at, now) || envelope.document_expired_at(now) {
            debug!(key = %key, "Cache entry stale");
            return Ok(None);
        }

        debug!(key = %key, "Cache hit");
        Ok(Some(envelope))
    }

    async fn load(&self, key: &NamespacedKey) -> CacheResult<Option<CacheEnvelope>> {
        let encoded = key.encode();
        match self.backend.get(&encoded).await? {
            None => Ok(None),
            Some(CachePayload::Native(envelope)) => Ok(Some(envelope)),
            Some(CachePayload::Text(text)) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| CacheError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn store(&self, key: &NamespacedKey, envelope: CacheEnvelope) -> CacheResult<()> {
        let payload = match self.codec {
            Codec::Native => CachePayload::Native(envelope),
            Codec::Text => CachePayload::Text(serde_json::to_string(&envelope).map_err(|e| {
                CacheError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        self.backend.set(&key.encode(), payload).await
    }
}

fn encode_entries(key: &NamespacedKey, entries: &[Entry]) -> CacheResult<Value> {
    serde_json::to_value(entries).map_err(|e| CacheError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode_entries(key: &NamespacedKey, payload: Value) -> CacheResult<Vec<Entry>> {
    serde_json::from_value(payload).map_err(|e| CacheError::Deserialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lmdb_backend::LmdbCacheBackend;
    use crate::cache::memory_backend::MemoryCacheBackend;
    use crate::cache::ttl::TtlWindow;
    use chrono::Duration as ChronoDuration;
    use quickdoc_core::TtlPolicy;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn memory_layer(policy: TtlPolicy) -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryCacheBackend::new()), "JSON", policy.into())
    }

    #[tokio::test]
    async fn test_codec_follows_backend() {
        let layer = memory_layer(TtlPolicy::default());
        assert_eq!(layer.codec(), Codec::Native);

        let dir = TempDir::new().expect("TempDir creation should succeed");
        let lmdb = LmdbCacheBackend::new(dir.path(), 10).expect("backend creation should succeed");
        let layer = CacheLayer::new(Arc::new(lmdb), "JSON", TtlPolicy::default().into());
        assert_eq!(layer.codec(), Codec::Text);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let layer = memory_layer(TtlPolicy::default());
        layer
            .write("user", json!({ "name": "a" }), None, WriteOrigin::Single)
            .await
            .expect("write should succeed");

        let cached = layer.read("user").await.expect("read should succeed");
        assert_eq!(cached, Some(json!({ "name": "a" })));
        assert_eq!(layer.read("other").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_text_codec_roundtrip_through_lmdb() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let lmdb = LmdbCacheBackend::new(dir.path(), 10).expect("backend creation should succeed");
        let layer = CacheLayer::new(Arc::new(lmdb), "JSON", TtlPolicy::default().into());

        layer
            .write("user", json!({ "list": [1, 2, 3] }), None, WriteOrigin::Single)
            .await
            .expect("write should succeed");
        assert_eq!(
            layer.read("user").await.expect("read"),
            Some(json!({ "list": [1, 2, 3] }))
        );
    }

    #[tokio::test]
    async fn test_disabled_class_never_reads_or_writes() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let layer = CacheLayer::new(backend.clone(), "JSON", TtlPolicy::disabled().into());

        layer
            .write("user", json!(1), None, WriteOrigin::Single)
            .await
            .expect("write should succeed");
        layer.write_probe(5).await.expect("probe write");
        layer
            .write_snapshot(&[Entry::new("a", json!(1))])
            .await
            .expect("snapshot write");

        assert!(backend.is_empty().await);
        assert_eq!(layer.read("user").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let layer = memory_layer(TtlPolicy::default().with_read_ms(200));
        layer
            .write("k", json!("v"), None, WriteOrigin::Single)
            .await
            .expect("write should succeed");
        assert!(layer.read("k").await.expect("read").is_some());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(layer.read("k").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_forever_window_and_document_expiry() {
        let layer = memory_layer(TtlPolicy::default().with_read_ms(0));
        let past = Utc::now() - ChronoDuration::seconds(1);
        let future = Utc::now() + ChronoDuration::seconds(60);

        layer
            .write("dead", json!(1), Some(past), WriteOrigin::Single)
            .await
            .expect("write");
        layer
            .write("live", json!(2), Some(future), WriteOrigin::Single)
            .await
            .expect("write");

        assert_eq!(layer.read("dead").await.expect("read"), None);
        assert_eq!(layer.read("live").await.expect("read"), Some(json!(2)));
        assert_eq!(layer.ttl().read, TtlWindow::Forever);
    }

    #[tokio::test]
    async fn test_snapshot_warms_entries() {
        let layer = memory_layer(TtlPolicy::default());
        let rows = vec![Entry::new("a", json!(1)), Entry::new("b", json!(2))];
        layer.write_snapshot(&rows).await.expect("snapshot write");

        assert_eq!(layer.read_snapshot().await.expect("read"), Some(rows));
        assert_eq!(layer.read("b").await.expect("read"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_single_write_patches_snapshot() {
        let layer = memory_layer(TtlPolicy::default());
        layer
            .write_snapshot(&[Entry::new("a", json!(1)), Entry::new("b", json!(2))])
            .await
            .expect("snapshot write");

        layer
            .write("b", json!(20), None, WriteOrigin::Single)
            .await
            .expect("write");
        layer
            .write("c", json!(3), None, WriteOrigin::Single)
            .await
            .expect("write");

        let snapshot = layer.read_snapshot().await.expect("read").expect("present");
        let rows: Vec<(String, Value)> = snapshot.into_iter().map(|e| (e.id, e.data)).collect();
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(20)),
                ("c".to_string(), json!(3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_write_does_not_create_snapshot() {
        let layer = memory_layer(TtlPolicy::default());
        layer
            .write("a", json!(1), None, WriteOrigin::Single)
            .await
            .expect("write");
        assert_eq!(layer.read_snapshot().await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_patch_keeps_snapshot_age() {
        let layer = memory_layer(TtlPolicy::default().with_snapshot_ms(200));
        layer
            .write_snapshot(&[Entry::new("a", json!(1))])
            .await
            .expect("snapshot write");

        tokio::time::sleep(Duration::from_millis(120)).await;
        layer
            .write("a", json!(2), None, WriteOrigin::Single)
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(layer.read_snapshot().await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_snapshot_hides_rows_that_expired_later() {
        let layer = memory_layer(TtlPolicy::default());
        let mut dying = Entry::new("a", json!(1));
        dying.expire_at = Some(Utc::now() + ChronoDuration::milliseconds(20));
        layer
            .write_snapshot(&[dying, Entry::new("b", json!(2))])
            .await
            .expect("snapshot write");

        tokio::time::sleep(Duration::from_millis(40)).await;
        let rows = layer.read_snapshot().await.expect("read").expect("present");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "b");
    }

    #[tokio::test]
    async fn test_remove_leaves_snapshot() {
        let layer = memory_layer(TtlPolicy::default());
        layer
            .write_snapshot(&[Entry::new("a", json!(1))])
            .await
            .expect("snapshot write");

        assert!(layer.remove("a").await.expect("remove"));
        assert_eq!(layer.read("a").await.expect("read"), None);
        assert_eq!(
            layer.read_snapshot().await.expect("read").map(|rows| rows.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_clear_only_touches_own_namespace() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new());
        let parent = CacheLayer::new(backend.clone(), "JSON", TtlPolicy::default().into());
        let table = parent.derive("users", TtlPolicy::default().into());

        parent
            .write("k", json!("parent"), None, WriteOrigin::Single)
            .await
            .expect("write");
        table
            .write("k", json!("table"), None, WriteOrigin::Single)
            .await
            .expect("write");
        assert_eq!(parent.read("k").await.expect("read"), Some(json!("parent")));
        assert_eq!(table.read("k").await.expect("read"), Some(json!("table")));

        parent.clear().await.expect("clear");
        assert_eq!(parent.read("k").await.expect("read"), None);
        assert_eq!(table.read("k").await.expect("read"), Some(json!("table")));
    }

    #[tokio::test]
    async fn test_probe_roundtrip() {
        let layer = memory_layer(TtlPolicy::default());
        assert_eq!(layer.read_probe().await.expect("read"), None);
        layer.write_probe(12).await.expect("write");
        assert_eq!(layer.read_probe().await.expect("read"), Some(12));
    }

    #[tokio::test]
    async fn test_corrupt_text_is_reported() {
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new());
        backend
            .set(
                &NamespacedKey::entry("JSON", "k").encode(),
                CachePayload::Text("not json".to_string()),
            )
            .await
            .expect("set");
        let layer = CacheLayer::new(backend, "JSON", TtlPolicy::default().into());

        let err = layer.read("k").await.expect_err("corrupt payload should fail");
        assert!(matches!(err, CacheError::Deserialization { .. }));
    }
}
