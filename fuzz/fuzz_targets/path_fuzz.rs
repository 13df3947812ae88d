//! Fuzz test for dotted-path keys
//!
//! Feeds arbitrary keys through key parsing and the path helpers, looking for:
//! - Panics in parsing or path navigation
//! - Keys that do not display back to themselves
//! - Writes that cannot be read back
//!
//! Run with: cargo +nightly fuzz run path_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use quickdoc_core::path::{get_path, set_path, unset_path};
use quickdoc_core::PathAddress;
use serde_json::{json, Value};

fuzz_target!(|data: &[u8]| {
    // Long keys of index segments pad one array per level.
    if data.len() > 256 {
        return;
    }
    let Ok(key) = std::str::from_utf8(data) else {
        return;
    };

    let address = match PathAddress::parse(key) {
        Ok(address) => address,
        Err(err) => {
            assert!(!err.to_string().is_empty(), "Error message should not be empty");
            return;
        }
    };
    assert_eq!(address.to_string(), key, "Parsed key should display as itself");
    assert!(!address.master().is_empty());
    assert_eq!(address.is_root(), !key.contains('.'));

    let marker = json!({ "marker": true });
    let mut document = Value::Object(Default::default());
    set_path(&mut document, address.child(), marker.clone());
    assert_eq!(address.pick(&document), Some(&marker), "Written value should read back");

    if !address.is_root() {
        assert!(unset_path(&mut document, address.child()));
        let left = get_path(&document, address.child());
        assert!(
            left.map_or(true, Value::is_null),
            "Removed value should be gone or nulled"
        );
    }
});
