//! Error types for quickdoc operations

use crate::ConnectionState;
use thiserror::Error;

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("Query on {collection} failed: {reason}")]
    Query { collection: String, reason: String },

    #[error("Write to {collection} failed for {id}: {reason}")]
    Write {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Document {id} already exists in {collection}")]
    DuplicateId { collection: String, id: String },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Collection {collection} has been dropped")]
    CollectionDropped { collection: String },
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache deserialization failed for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Backend only stores text payloads, got a native payload for {key}")]
    UnsupportedPayload { key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all quickdoc errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QuickDocError {
    #[error("Database is not ready (state: {state})")]
    NotReady { state: ConnectionState },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("No default value for {key:?}")]
    MissingDefault { key: String },

    #[error("Cannot target a non-object value at {key:?}")]
    CannotTargetNonObject { key: String },

    #[error("Target {key:?} is not an array")]
    TargetExpectedArray { key: String },

    #[error("Type mismatch for {key:?}: expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },

    #[error("Parent database has no live connection")]
    ParentHasNoConnection,

    #[error("Table name is required")]
    TableNameRequired,

    #[error("Tables cannot open nested tables")]
    TableNotInvocable,

    #[error("Missing database url")]
    MissingUrl,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for quickdoc operations.
pub type QuickDocResult<T> = Result<T, QuickDocError>;

/// Result type alias for store-level operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
