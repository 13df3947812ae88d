//! quickdoc Test Utilities
//!
//! Shared test infrastructure for the quickdoc workspace:
//! - Proptest generators for keys, path segments and JSON values
//! - Fixtures that build connected in-memory databases
//! - Custom assertions for quickdoc results
//! - Tracing initialisation for tests

pub use quickdoc::{
    Database, DatabaseOptions, Entry, MemoryCluster, MemoryConnector, QuickDocError,
    QuickDocResult, TtlPolicy, WriteErrorPolicy,
};
pub use quickdoc_core::PathAddress;

use std::sync::Once;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and documents.

    use proptest::prelude::*;
    use serde_json::{Map, Number, Value};

    /// One key segment: a short identifier, never numeric.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    /// A valid key with up to four segments.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 1..=4).prop_map(|segments| segments.join("."))
    }

    /// A dotted key with at least one child segment.
    pub fn arb_dotted_key() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 2..=4).prop_map(|segments| segments.join("."))
    }

    /// A JSON scalar other than `null`.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(Number::from(n))),
            (-1.0e9f64..1.0e9)
                .prop_filter_map("finite", Number::from_f64)
                .prop_map(Value::Number),
            "[ -~]{0,16}".prop_map(Value::String),
        ]
    }

    /// An arbitrary JSON value without `null`, nested up to three levels.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(arb_segment(), inner, 0..4)
                    .prop_map(|fields| Value::Object(fields.into_iter().collect())),
            ]
        })
    }

    /// A JSON object with up to `max_fields` fields.
    pub fn arb_object(max_fields: usize) -> impl Strategy<Value = Value> {
        prop::collection::btree_map(arb_segment(), arb_json(), 0..=max_fields).prop_map(
            |fields| {
                let map: Map<String, Value> = fields.into_iter().collect();
                Value::Object(map)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built databases for common test scenarios.

    use super::*;
    use std::sync::Arc;

    /// Url used by the in-memory fixtures.
    pub const MEMORY_URL: &str = "memory://localhost/quickdoc-test";

    /// Options with every cache class disabled, so every read hits the store.
    pub fn uncached_options() -> DatabaseOptions {
        DatabaseOptions::default().with_ttl(TtlPolicy::disabled())
    }

    /// A connected in-memory database with default options.
    pub async fn memory_database() -> QuickDocResult<Database> {
        memory_database_with(DatabaseOptions::default()).await.map(|(db, _)| db)
    }

    /// A connected in-memory database plus the connector, for tests that
    /// edit the store out of band or inject faults.
    pub async fn memory_database_with(
        options: DatabaseOptions,
    ) -> QuickDocResult<(Database, MemoryConnector)> {
        let connector = MemoryConnector::new(MemoryCluster::new());
        let db = Database::new(MEMORY_URL, options, Arc::new(connector.clone()));
        db.connect().await?;
        Ok((db, connector))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for quickdoc results.

    use super::*;

    /// Assert that a result is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &QuickDocResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a result is an `InvalidKey` error.
    #[track_caller]
    pub fn assert_invalid_key<T: std::fmt::Debug>(result: &QuickDocResult<T>) {
        match result {
            Err(QuickDocError::InvalidKey { .. }) => {}
            other => panic!("Expected InvalidKey, got: {:?}", other),
        }
    }

    /// Assert that a result is a `NotReady` error.
    #[track_caller]
    pub fn assert_not_ready<T: std::fmt::Debug>(result: &QuickDocResult<T>) {
        match result {
            Err(QuickDocError::NotReady { .. }) => {}
            other => panic!("Expected NotReady, got: {:?}", other),
        }
    }

    /// Assert that a listing has exactly these IDs, in order.
    #[track_caller]
    pub fn assert_ids(entries: &[Entry], expected: &[&str]) {
        let ids: Vec<&str> = entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, expected, "listing IDs differ");
    }
}

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `quickdoc=debug`.
/// Output goes through the test writer so it is captured per test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quickdoc=debug,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// TESTS
// ============================================================================
