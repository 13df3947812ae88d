//! Property-Based Tests for key operations
//!
//! Each case runs against a fresh in-memory database on its own runtime.

use proptest::prelude::*;
use quickdoc_test_utils::fixtures::memory_database;
use quickdoc_test_utils::generators::{arb_dotted_key, arb_json, arb_key, arb_object, arb_segment};
use serde_json::{json, Value};
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: get returns what set stored, cached or not
    #[test]
    fn prop_set_then_get(key in arb_key(), value in arb_json()) {
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            let returned = db.set(&key, value.clone()).await.expect("set should succeed");
            prop_assert_eq!(returned, Some(value.clone()));
            prop_assert_eq!(db.get(&key, false).await.expect("get"), Some(value.clone()));
            prop_assert_eq!(db.fetch(&key).await.expect("fetch"), Some(value));
            Ok(())
        })?;
    }

    /// Property: a dotted set leaves sibling fields of the root alone
    #[test]
    fn prop_dotted_set_keeps_siblings(
        root in arb_segment(),
        field in arb_segment(),
        sibling in arb_segment(),
        existing in arb_json(),
        value in arb_json(),
    ) {
        prop_assume!(field != sibling);
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            db.set(&root, json!({ (sibling.clone()): existing.clone() })).await.expect("set");
            db.set(&format!("{root}.{field}"), value.clone()).await.expect("set");

            prop_assert_eq!(
                db.fetch(&format!("{root}.{sibling}")).await.expect("fetch"),
                Some(existing)
            );
            prop_assert_eq!(
                db.fetch(&format!("{root}.{field}")).await.expect("fetch"),
                Some(value)
            );
            Ok(())
        })?;
    }

    /// Property: delete after set removes the key, and a second delete is a no-op
    #[test]
    fn prop_delete_idempotent(key in arb_dotted_key(), value in arb_json()) {
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            db.set(&key, value).await.expect("set");
            prop_assert!(db.delete(&key).await.expect("delete"));
            prop_assert_eq!(db.get(&key, false).await.expect("get"), None);
            prop_assert_eq!(db.fetch(&key).await.expect("fetch"), None);
            // The root still exists, so a dotted delete keeps reporting success.
            prop_assert!(db.delete(&key).await.expect("delete"));
            prop_assert_eq!(db.fetch(&key).await.expect("fetch"), None);
            Ok(())
        })?;
    }

    /// Property: ensure twice changes nothing the second time
    #[test]
    fn prop_ensure_converges(key in arb_key(), defaults in arb_object(4)) {
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            db.ensure(&key, defaults.clone()).await.expect("ensure");
            let first = db.fetch(&key).await.expect("fetch");
            prop_assert!(!db.ensure(&key, defaults).await.expect("ensure"));
            prop_assert_eq!(db.fetch(&key).await.expect("fetch"), first);
            Ok(())
        })?;
    }

    /// Property: pull with all occurrences undoes a push of a fresh value
    #[test]
    fn prop_push_pull_inverse(
        key in arb_key(),
        items in prop::collection::vec(0i64..100, 0..6),
        extra in 100i64..200,
    ) {
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            let list = Value::from(items);
            db.set(&key, list.clone()).await.expect("set");
            db.push(&key, extra, false).await.expect("push");
            prop_assert_eq!(db.pull(&key, extra, true).await.expect("pull"), Some(list));
            Ok(())
        })?;
    }

    /// Property: add then subtract of the same integer restores the value
    #[test]
    fn prop_add_subtract_inverse(key in arb_key(), start in -1_000i64..1_000, delta in -1_000i64..1_000) {
        runtime().block_on(async {
            let db = memory_database().await.expect("fixture should connect");
            db.set(&key, start).await.expect("set");
            db.add(&key, delta).await.expect("add");
            prop_assert_eq!(db.subtract(&key, delta).await.expect("subtract"), Some(json!(start)));
            Ok(())
        })?;
    }
}
