//! quickdoc Core - Data Types
//!
//! Documents, dotted-path addressing, default-shape merging, configuration
//! and lifecycle events. Every other quickdoc crate depends on this one.
//! Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod path;

pub use config::{
    CacheBackendKind, CacheOptions, DatabaseOptions, TtlPolicy, WriteErrorPolicy,
    DEFAULT_COLLECTION,
};
pub use error::{
    CacheError, CacheResult, ConfigError, QuickDocError, QuickDocResult, StorageError,
    StorageResult,
};
pub use event::{EventKind, LifecycleEvent};
pub use merge::{ensure_defaults, merge_missing_leaves, EnsureDefaults, MergeReport};
pub use path::{pick, PathAddress, PATH_SEPARATOR};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Root-level document identifier.
pub type DocumentId = String;

// ============================================================================
// DOCUMENTS
// ============================================================================

/// A stored document.
///
/// Field names follow the persisted layout: `ID`, `data`, `expireAt`,
/// `createdAt`, `updatedAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "ID")]
    pub id: DocumentId,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "expireAt", default)]
    pub expire_at: Option<Timestamp>,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(rename = "updatedAt")]
    pub updated_at: Timestamp,
}

impl Document {
    /// True once `expireAt` has passed at `now`.
    ///
    /// The store's own sweep may leave the document physically present for a
    /// while after this starts returning true.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        is_expired(self.expire_at, now)
    }

    /// Same as [`Document::is_expired_at`] against the current clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Project to the `{ID, data}` pair used by listings.
    pub fn to_entry(&self) -> Entry {
        Entry {
            id: self.id.clone(),
            data: self.data.clone(),
            expire_at: self.expire_at,
        }
    }
}

/// Document to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub id: DocumentId,
    pub data: Value,
    pub expire_at: Option<Timestamp>,
}

impl NewDocument {
    pub fn new(id: impl Into<DocumentId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            expire_at: None,
        }
    }

    pub fn with_expiry(mut self, expire_at: Option<Timestamp>) -> Self {
        self.expire_at = expire_at;
        self
    }

    /// Materialise with creation timestamps.
    pub fn into_document(self, now: Timestamp) -> Document {
        Document {
            id: self.id,
            data: self.data,
            expire_at: self.expire_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What an update does to a document's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryUpdate {
    /// Leave `expireAt` as stored.
    #[default]
    Keep,
    /// Overwrite `expireAt`; `None` clears it.
    Set(Option<Timestamp>),
}

/// Partial update applied to an existing document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPatch {
    pub data: Value,
    pub expire_at: ExpiryUpdate,
}

impl DocumentPatch {
    /// Replace `data`, keep the stored expiry.
    pub fn data(data: Value) -> Self {
        Self {
            data,
            expire_at: ExpiryUpdate::Keep,
        }
    }

    /// Replace `data` and overwrite the expiry.
    pub fn with_expiry(data: Value, expire_at: Option<Timestamp>) -> Self {
        Self {
            data,
            expire_at: ExpiryUpdate::Set(expire_at),
        }
    }

    /// Apply this patch to `document`, bumping `updatedAt`.
    pub fn apply(&self, document: &mut Document, now: Timestamp) {
        document.data = self.data.clone();
        if let ExpiryUpdate::Set(expire_at) = self.expire_at {
            document.expire_at = expire_at;
        }
        document.updated_at = now;
    }
}

/// One row of a collection listing.
///
/// `expire_at` is kept so a cached listing can hide rows that expired after
/// it was taken; it is not serialised into listings handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "ID")]
    pub id: DocumentId,
    pub data: Value,
    #[serde(rename = "expireAt", default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<Timestamp>,
}

impl Entry {
    pub fn new(id: impl Into<DocumentId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            expire_at: None,
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        is_expired(self.expire_at, now)
    }
}

/// Collection identity as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    pub database: String,
    pub namespace: String,
}

impl CollectionMetadata {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        let database = database.into();
        let name = name.into();
        Self {
            namespace: format!("{database}.{name}"),
            name,
            database,
        }
    }
}

/// Count and size figures of one collection, as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub namespace: String,
    /// Stored documents, expired leftovers included.
    pub count: u64,
    /// Total document size in bytes.
    pub size: u64,
    /// Mean document size in bytes. 0 for an empty collection.
    pub avg_obj_size: u64,
    pub index_count: u64,
}

impl CollectionStats {
    pub fn new(namespace: impl Into<String>, count: u64, size: u64, index_count: u64) -> Self {
        Self {
            namespace: namespace.into(),
            count,
            size,
            avg_obj_size: size.checked_div(count).unwrap_or(0),
            index_count,
        }
    }
}

// ============================================================================
// EXPIRY
// ============================================================================

/// True if `expire_at` is set and not after `now`.
pub fn is_expired(expire_at: Option<Timestamp>, now: Timestamp) -> bool {
    matches!(expire_at, Some(at) if at <= now)
}

/// Whether a TTL in seconds asks for expiry at all.
///
/// Zero, negative, NaN and infinite values mean "never expires".
pub fn should_expire(ttl_seconds: f64) -> bool {
    ttl_seconds.is_finite() && ttl_seconds > 0.0
}

/// Expiry instant for a TTL in seconds, or `None` if it never expires.
pub fn expiry_from_seconds(ttl_seconds: f64, now: Timestamp) -> Option<Timestamp> {
    if !should_expire(ttl_seconds) {
        return None;
    }
    let millis = (ttl_seconds * 1000.0).ceil();
    if millis > i64::MAX as f64 {
        return None;
    }
    chrono::Duration::try_milliseconds(millis as i64).and_then(|d| now.checked_add_signed(d))
}

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Lifecycle state of a database handle.
///
/// `Uninitialized -> Connecting -> Ready -> Closed`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
}

impl ConnectionState {
    /// Numeric ready-state code in the driver convention.
    pub fn code(&self) -> u8 {
        match self {
            ConnectionState::Uninitialized => 0,
            ConnectionState::Ready => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Closed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
