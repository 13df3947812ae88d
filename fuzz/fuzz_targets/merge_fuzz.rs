//! Fuzz test for default-shape merging
//!
//! Splits the input into two JSON documents and merges the second into the
//! first, checking that:
//! - Merging never panics
//! - A second merge with the same defaults inserts nothing
//! - Values already present are never overwritten
//!
//! Run with: cargo +nightly fuzz run merge_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use quickdoc_core::merge::merge_missing_leaves;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Some((left, right)) = input.split_once('\n') else {
        return;
    };
    let (Ok(existing), Ok(defaults)) = (
        serde_json::from_str::<Value>(left),
        serde_json::from_str::<Value>(right),
    ) else {
        return;
    };

    let mut merged = existing.clone();
    let report = merge_missing_leaves(&mut merged, &defaults);

    if let (Value::Object(before), Value::Object(after)) = (&existing, &merged) {
        for (key, value) in before.iter().filter(|(_, value)| !value.is_object()) {
            assert_eq!(after.get(key), Some(value), "Existing field {key:?} should be kept");
        }
    }

    if report.changed() {
        assert_ne!(merged, existing, "Inserted leaves should change the value");
    }

    let again = merge_missing_leaves(&mut merged.clone(), &defaults);
    assert!(!again.changed(), "Second merge should insert nothing");
});
