//! Key-Value Operation Tests
//!
//! Drives a connected in-memory database through every key operation:
//! dotted-path reads and writes, deletes, default-shape merging, array and
//! number mutations, and time-to-live expiry.

use quickdoc::{QuickDocError, WriteErrorPolicy};
use quickdoc_test_utils::assertions::{assert_invalid_key, assert_ok};
use quickdoc_test_utils::fixtures::{memory_database, memory_database_with};
use quickdoc_test_utils::{init_test_tracing, DatabaseOptions};
use serde_json::{json, Value};
use std::time::Duration;

// ============================================================================
// SET / GET
// ============================================================================

#[tokio::test]
async fn test_set_get_scalar_object_array() {
    init_test_tracing();
    let db = memory_database().await.expect("fixture should connect");

    for (key, value) in [
        ("scalar", json!(42)),
        ("object", json!({ "name": "ada", "tags": ["x"] })),
        ("array", json!([1, "two", { "three": 3 }])),
    ] {
        let returned = db.set(key, value.clone()).await.expect("set should succeed");
        assert_eq!(returned, Some(value.clone()));
        assert_eq!(db.get(key, false).await.expect("get should succeed"), Some(value.clone()));
        assert_eq!(db.fetch(key).await.expect("fetch should succeed"), Some(value));
    }
}

#[tokio::test]
async fn test_dotted_set_keeps_siblings() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("user", json!({ "name": "ada", "age": 36 }))
        .await
        .expect("set should succeed");

    let returned = db
        .set("user.profile.lang", "en")
        .await
        .expect("dotted set should succeed");
    assert_eq!(returned, Some(json!("en")));

    assert_eq!(
        db.fetch("user").await.expect("fetch should succeed"),
        Some(json!({ "name": "ada", "age": 36, "profile": { "lang": "en" } }))
    );
}

#[tokio::test]
async fn test_dotted_set_creates_document() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("settings.theme.color", "blue")
        .await
        .expect("set should succeed");
    assert_eq!(
        db.fetch("settings").await.expect("fetch"),
        Some(json!({ "theme": { "color": "blue" } }))
    );
}

#[tokio::test]
async fn test_dotted_set_into_scalar_root_fails() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("name", "ada").await.expect("set should succeed");
    db.set("list", json!([1, 2])).await.expect("set should succeed");

    for key in ["name.first", "list.0"] {
        let err = db.set(key, 1).await.expect_err("sub-path of a non-object");
        assert!(matches!(err, QuickDocError::CannotTargetNonObject { .. }));
        let err = db.delete(key).await.expect_err("sub-path of a non-object");
        assert!(matches!(err, QuickDocError::CannotTargetNonObject { .. }));
    }
}

#[tokio::test]
async fn test_null_reads_as_absent_and_falsy_values_survive() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("nothing", Value::Null).await.expect("set should succeed");
    assert_eq!(db.get("nothing", false).await.expect("get"), None);
    assert!(!db.has("nothing", false).await.expect("has"));

    for (key, value) in [("zero", json!(0)), ("empty", json!("")), ("no", json!(false))] {
        db.set(key, value.clone()).await.expect("set should succeed");
        assert_eq!(db.get(key, true).await.expect("get"), Some(value));
        assert!(db.has(key, false).await.expect("has"));
    }
}

#[tokio::test]
async fn test_invalid_keys_rejected() {
    let db = memory_database().await.expect("fixture should connect");
    assert_invalid_key(&db.get("", false).await);
    assert_invalid_key(&db.set("a..b", 1).await);
    assert_invalid_key(&db.delete(".a").await);
    assert_invalid_key(&db.push("a.", 1, false).await);
}

// ============================================================================
// DELETE
// ============================================================================

#[tokio::test]
async fn test_delete_is_idempotent() {
    let db = memory_database().await.expect("fixture should connect");

    assert!(!db.delete("ghost").await.expect("delete should succeed"));
    assert!(!db.delete("ghost").await.expect("delete should succeed"));

    db.set("k", 1).await.expect("set should succeed");
    assert!(db.delete("k").await.expect("delete should succeed"));
    assert!(!db.delete("k").await.expect("delete should succeed"));
    assert_eq!(db.get("k", false).await.expect("get"), None);
}

#[tokio::test]
async fn test_dotted_delete() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("u", json!({ "a": 1, "b": { "c": 2, "d": 3 } }))
        .await
        .expect("set should succeed");

    assert!(db.delete("u.b.c").await.expect("delete should succeed"));
    assert_eq!(
        db.get("u", false).await.expect("get"),
        Some(json!({ "a": 1, "b": { "d": 3 } }))
    );
    assert_eq!(
        db.fetch("u").await.expect("fetch"),
        Some(json!({ "a": 1, "b": { "d": 3 } }))
    );

    assert!(!db.delete("missing.a").await.expect("delete should succeed"));
}

#[tokio::test]
async fn test_delete_all() {
    let db = memory_database().await.expect("fixture should connect");
    assert!(!db.delete_all().await.expect("delete_all should succeed"));

    db.set("a", 1).await.expect("set");
    db.set("b", 2).await.expect("set");
    assert!(db.delete_all().await.expect("delete_all should succeed"));
    assert_eq!(db.count(true).await.expect("count"), 0);
    assert_eq!(db.get("a", false).await.expect("get"), None);
}

#[tokio::test]
async fn test_drop_collection() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("a", 1).await.expect("set");
    assert!(db.drop().await.expect("drop should succeed"));
    assert_eq!(db.get("a", false).await.expect("get"), None);
}

// ============================================================================
// ENSURE
// ============================================================================

#[tokio::test]
async fn test_ensure_merges_missing_leaves() {
    let db = memory_database().await.expect("fixture should connect");

    let changed = db
        .ensure("a", json!({ "x": 1, "y": 2 }))
        .await
        .expect("ensure should succeed");
    assert!(changed);
    assert_eq!(db.get("a", false).await.expect("get"), Some(json!({ "x": 1, "y": 2 })));

    assert!(!db
        .ensure("a", json!({ "x": 1, "y": 2 }))
        .await
        .expect("ensure should succeed"));

    db.set("a.x", 99).await.expect("set should succeed");
    assert!(db
        .ensure("a", json!({ "x": 1, "y": 2, "z": { "deep": true } }))
        .await
        .expect("ensure should succeed"));
    assert_eq!(
        db.fetch("a").await.expect("fetch"),
        Some(json!({ "x": 99, "y": 2, "z": { "deep": true } }))
    );
}

#[tokio::test]
async fn test_ensure_bare_key_merges_into_root() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("cfg", json!({ "debug": true })).await.expect("set");

    assert!(db
        .ensure("cfg", json!({ "debug": false, "level": "info" }))
        .await
        .expect("ensure should succeed"));
    assert_eq!(
        db.fetch("cfg").await.expect("fetch"),
        Some(json!({ "debug": true, "level": "info" }))
    );
}

#[tokio::test]
async fn test_ensure_keeps_values_of_another_type() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("cfg", json!({ "mode": { "custom": 1 } })).await.expect("set");

    assert!(!db
        .ensure("cfg", json!({ "mode": "fast" }))
        .await
        .expect("ensure should succeed"));
    assert_eq!(
        db.fetch("cfg.mode").await.expect("fetch"),
        Some(json!({ "custom": 1 }))
    );
}

#[tokio::test]
async fn test_ensure_keeps_scalar_on_the_path() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("k.a", 5).await.expect("set");
    db.set("k.list", json!([1, 2])).await.expect("set");

    assert!(!db
        .ensure("k.a.b", json!({ "x": 1 }))
        .await
        .expect("ensure should succeed"));
    assert!(!db
        .ensure("k.list.name", json!({ "x": 1 }))
        .await
        .expect("ensure should succeed"));
    assert_eq!(
        db.fetch("k").await.expect("fetch"),
        Some(json!({ "a": 5, "list": [1, 2] }))
    );

    // A missing branch next to the scalar is still created.
    assert!(db
        .ensure("k.b.c", json!({ "x": 1 }))
        .await
        .expect("ensure should succeed"));
    assert_eq!(db.fetch("k.b.c.x").await.expect("fetch"), Some(json!(1)));
}

#[tokio::test]
async fn test_ensure_requires_default() {
    let db = memory_database().await.expect("fixture should connect");
    let err = db.ensure("a", Value::Null).await.expect_err("null default");
    assert!(matches!(err, QuickDocError::MissingDefault { .. }));
}

// ============================================================================
// ARRAYS
// ============================================================================

#[tokio::test]
async fn test_push_pull_inverse() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("list", json!(["a", "b"])).await.expect("set");

    assert_eq!(
        db.push("list", "v", false).await.expect("push should succeed"),
        Some(json!(["a", "b", "v"]))
    );
    assert_eq!(
        db.pull("list", "v", true).await.expect("pull should succeed"),
        Some(json!(["a", "b"]))
    );
    assert_eq!(db.fetch("list").await.expect("fetch"), Some(json!(["a", "b"])));
}

#[tokio::test]
async fn test_push_creates_and_concatenates() {
    let db = memory_database().await.expect("fixture should connect");
    assert_eq!(db.push("fresh", 1, false).await.expect("push"), Some(json!([1])));
    assert_eq!(
        db.push("fresh", json!([2, 3]), false).await.expect("push"),
        Some(json!([1, 2, 3]))
    );
    assert_eq!(
        db.push("doc.items", json!(["x"]), false).await.expect("push"),
        Some(json!(["x"]))
    );
}

#[tokio::test]
async fn test_array_ops_on_non_array_fail() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("n", 5).await.expect("set");

    let err = db.push("n", 1, false).await.expect_err("push onto a number");
    assert!(matches!(err, QuickDocError::TargetExpectedArray { .. }));
    let err = db.pull("n", 1, true).await.expect_err("pull from a number");
    assert!(matches!(err, QuickDocError::TargetExpectedArray { .. }));
}

#[tokio::test]
async fn test_pull_modes() {
    let db = memory_database().await.expect("fixture should connect");
    assert_eq!(db.pull("absent", 1, true).await.expect("pull"), None);

    db.set("list", json!([1, 2, 1, 3, 1])).await.expect("set");
    assert_eq!(
        db.pull("list", 1, false).await.expect("pull"),
        Some(json!([2, 1, 3, 1]))
    );
    assert_eq!(db.pull("list", 9, false).await.expect("pull"), None);
    assert_eq!(
        db.pull("list", 1, true).await.expect("pull"),
        Some(json!([2, 3]))
    );
    assert_eq!(
        db.pull("list", json!([2, 3]), false).await.expect("pull"),
        Some(json!([]))
    );
}

#[tokio::test]
async fn test_filter_by_value_and_predicate() {
    let db = memory_database().await.expect("fixture should connect");
    assert_eq!(db.filter_eq("absent", 1).await.expect("filter"), None);

    db.set("user.langs", json!(["en", "fr", "en", { "code": "de" }]))
        .await
        .expect("set");
    assert_eq!(
        db.filter_eq("user.langs", "en").await.expect("filter"),
        Some(json!(["en", "en"]))
    );
    assert_eq!(
        db.filter_eq("user.langs", json!({ "code": "de" })).await.expect("filter"),
        Some(json!([{ "code": "de" }]))
    );
    assert_eq!(
        db.filter("user.langs", |item| item.is_string() && *item != json!("en"))
            .await
            .expect("filter"),
        Some(json!(["fr"]))
    );

    // Filtering reads only.
    let stored = db
        .fetch("user.langs")
        .await
        .expect("fetch")
        .expect("langs should exist");
    assert_eq!(stored.as_array().map(Vec::len), Some(4));

    db.set("user.name", "ada").await.expect("set");
    let err = db.filter_eq("user.name", "ada").await.expect_err("filter a string");
    assert!(matches!(err, QuickDocError::TargetExpectedArray { .. }));
}

// ============================================================================
// NUMBERS
// ============================================================================

#[tokio::test]
async fn test_add_then_subtract() {
    let db = memory_database().await.expect("fixture should connect");
    assert_eq!(db.add("k", 5).await.expect("add"), Some(json!(5)));
    assert_eq!(db.subtract("k", 2).await.expect("subtract"), Some(json!(3)));
    assert_eq!(db.fetch("k").await.expect("fetch"), Some(json!(3)));
}

#[tokio::test]
async fn test_add_on_nested_and_non_number() {
    let db = memory_database().await.expect("fixture should connect");
    db.set("stats", json!({ "visits": "many" })).await.expect("set");

    assert_eq!(db.add("stats.visits", 2).await.expect("add"), Some(json!(2)));
    assert_eq!(db.add("stats.ratio", 0.5).await.expect("add"), Some(json!(0.5)));
    assert_eq!(
        db.fetch("stats").await.expect("fetch"),
        Some(json!({ "visits": 2, "ratio": 0.5 }))
    );
}

#[tokio::test]
async fn test_add_rejects_non_numbers() {
    let db = memory_database().await.expect("fixture should connect");
    let err = db.add("k", "five").await.expect_err("string operand");
    assert!(matches!(err, QuickDocError::TypeMismatch { .. }));
    let err = db.subtract("k", json!([1])).await.expect_err("array operand");
    assert!(matches!(err, QuickDocError::TypeMismatch { .. }));
}

// ============================================================================
// EXPIRY
// ============================================================================

#[tokio::test]
async fn test_ttl_expiry_masks_unswept_documents() {
    let (db, connector) = memory_database_with(DatabaseOptions::default())
        .await
        .expect("fixture should connect");

    db.set_with_ttl("session", "token", 1.0)
        .await
        .expect("set should succeed");
    assert_eq!(db.get("session", false).await.expect("get"), Some(json!("token")));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(db.get("session", false).await.expect("get"), None);
    assert_eq!(db.get("session", true).await.expect("get"), None);
    assert!(!db.has("session", false).await.expect("has"));

    // Still physically present until the sweep runs.
    let connection = connector
        .connect_memory(quickdoc_test_utils::fixtures::MEMORY_URL)
        .expect("out-of-band connection");
    let store = connection.memory_collection("JSON").await;
    assert_eq!(store.sweep_expired().await, 1);
}

#[tokio::test]
async fn test_non_positive_ttl_never_expires() {
    let db = memory_database().await.expect("fixture should connect");
    for (key, ttl) in [("zero", 0.0), ("negative", -5.0), ("nan", f64::NAN)] {
        db.set_with_ttl(key, 1, ttl).await.expect("set should succeed");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for key in ["zero", "negative", "nan"] {
        assert_eq!(db.fetch(key).await.expect("fetch"), Some(json!(1)));
    }
}

#[tokio::test]
async fn test_writing_over_expired_document_revives_it() {
    let db = memory_database().await.expect("fixture should connect");
    db.set_with_ttl("doc", json!({ "old": true }), 0.2)
        .await
        .expect("set should succeed");
    tokio::time::sleep(Duration::from_millis(300)).await;

    db.set("doc.new", true).await.expect("set should succeed");
    assert_eq!(db.fetch("doc").await.expect("fetch"), Some(json!({ "new": true })));
}

// ============================================================================
// STATS
// ============================================================================

#[tokio::test]
async fn test_collection_stats() {
    let db = memory_database().await.expect("fixture should connect");
    let empty = db.stats().await.expect("stats should succeed");
    assert_eq!(empty.namespace, "quickdoc-test.JSON");
    assert_eq!(empty.count, 0);

    db.set("a", json!({ "n": 1 })).await.expect("set");
    db.set("b.c", 2).await.expect("set");
    let stats = db.stats().await.expect("stats should succeed");
    assert_eq!(stats.count, 2);
    assert!(stats.size >= stats.avg_obj_size * 2);

    let users = db.open_table("users").await.expect("table should open");
    assert_eq!(users.stats().await.expect("stats").count, 0);
}

// ============================================================================
// WRITE ERRORS
// ============================================================================

#[tokio::test]
async fn test_swallowed_write_leaves_cache_untouched() {
    let (db, connector) = memory_database_with(DatabaseOptions::default())
        .await
        .expect("fixture should connect");
    db.set("k", 1).await.expect("set should succeed");

    connector.cluster().set_fail_writes(true);
    let returned = db.set("k", 2).await.expect("swallowed write returns Ok");
    assert_eq!(returned, Some(json!(1)));
    assert!(!db.delete("k").await.expect("swallowed delete returns Ok"));

    connector.cluster().set_fail_writes(false);
    assert_eq!(db.fetch("k").await.expect("fetch"), Some(json!(1)));
}

#[tokio::test]
async fn test_propagated_write_error() {
    let options = DatabaseOptions::default().with_write_errors(WriteErrorPolicy::Propagate);
    let (db, connector) = memory_database_with(options)
        .await
        .expect("fixture should connect");

    connector.cluster().set_fail_writes(true);
    let err = db.set("k", 1).await.expect_err("write should fail");
    assert!(matches!(err, QuickDocError::Storage(_)));
    let err = db.delete_all().await.expect_err("write should fail");
    assert!(matches!(err, QuickDocError::Storage(_)));

    connector.cluster().set_fail_writes(false);
    assert_ok(&db.set("k", 1).await);
}

#[tokio::test]
async fn test_read_errors_propagate() {
    let (db, connector) = memory_database_with(DatabaseOptions::default())
        .await
        .expect("fixture should connect");
    connector.cluster().set_fail_reads(true);
    let err = db.fetch("k").await.expect_err("read should fail");
    assert!(matches!(err, QuickDocError::Storage(_)));
}
