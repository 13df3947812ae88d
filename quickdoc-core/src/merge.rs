//! Default-shape deep merge.
//!
//! `ensure_defaults` inserts the leaves of a default shape that are missing
//! from an existing value and leaves everything already present untouched.
//!
//! # Leaves
//!
//! Scalars, arrays and empty objects in the default shape are leaves.
//! Non-empty objects are walked.
//!
//! # Type conflicts
//!
//! When the existing value already holds something at a path where the
//! default shape disagrees on kind (an object where the default has a leaf,
//! or a non-object where the default has a nested object), the existing
//! value is kept and the path is reported in [`MergeReport::conflicts`].

use serde_json::{Map, Value};

/// Outcome of [`ensure_defaults`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureDefaults {
    /// At least one leaf was inserted; carries the merged value.
    Changed(Value),
    /// Nothing was missing.
    Unchanged,
}

impl EnsureDefaults {
    /// True if the merge inserted anything.
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }

    /// The merged value, if anything changed.
    pub fn into_changed(self) -> Option<Value> {
        match self {
            Self::Changed(value) => Some(value),
            Self::Unchanged => None,
        }
    }
}

/// Paths touched by a merge, relative to the merged value's root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Paths that were inserted. The empty path means the whole value was
    /// taken from the defaults.
    pub inserted: Vec<String>,
    /// Paths where existing data of a different kind was kept.
    pub conflicts: Vec<String>,
}

impl MergeReport {
    /// True if anything was inserted.
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty()
    }
}

/// Merge the missing leaves of `defaults` into `existing`.
///
/// A `null` existing value counts as empty and is replaced by the defaults.
pub fn merge_missing_leaves(existing: &mut Value, defaults: &Value) -> MergeReport {
    let mut report = MergeReport::default();

    if defaults.is_null() {
        return report;
    }

    if existing.is_null() {
        *existing = defaults.clone();
        report.inserted.push(String::new());
        return report;
    }

    if existing.is_object() != defaults.is_object() {
        report.conflicts.push(String::new());
    } else if let (Value::Object(current), Value::Object(shape)) = (existing, defaults) {
        merge_into(current, shape, "", &mut report);
    }

    report
}

/// Merge `defaults` into `existing`, returning the merged value if changed.
pub fn ensure_defaults(mut existing: Value, defaults: &Value) -> EnsureDefaults {
    if merge_missing_leaves(&mut existing, defaults).changed() {
        EnsureDefaults::Changed(existing)
    } else {
        EnsureDefaults::Unchanged
    }
}

fn merge_into(
    current: &mut Map<String, Value>,
    shape: &Map<String, Value>,
    prefix: &str,
    report: &mut MergeReport,
) {
    for (key, default) in shape {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        let Some(existing) = current.get_mut(key) else {
            current.insert(key.clone(), default.clone());
            report.inserted.push(path);
            continue;
        };

        match default {
            Value::Object(nested) if !nested.is_empty() => match existing {
                Value::Object(existing) => merge_into(existing, nested, &path, report),
                _ => report.conflicts.push(path),
            },
            leaf => {
                if existing.is_object() && !leaf.is_object() {
                    report.conflicts.push(path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inserts_into_empty_object() {
        let merged = ensure_defaults(json!({}), &json!({ "x": 1, "y": 2 }));
        assert_eq!(merged, EnsureDefaults::Changed(json!({ "x": 1, "y": 2 })));
    }

    #[test]
    fn test_unchanged_when_all_present() {
        let merged = ensure_defaults(json!({ "x": 99, "y": 2 }), &json!({ "x": 1, "y": 2 }));
        assert_eq!(merged, EnsureDefaults::Unchanged);
    }

    #[test]
    fn test_keeps_overrides_and_adds_new_leaves() {
        let merged = ensure_defaults(
            json!({ "x": 99, "nested": { "a": "mine" } }),
            &json!({ "x": 1, "z": 3, "nested": { "a": "default", "b": "added" } }),
        );
        assert_eq!(
            merged,
            EnsureDefaults::Changed(json!({
                "x": 99,
                "z": 3,
                "nested": { "a": "mine", "b": "added" }
            }))
        );
    }

    #[test]
    fn test_empty_object_result_is_still_changed() {
        let merged = ensure_defaults(json!(null), &json!({}));
        assert_eq!(merged, EnsureDefaults::Changed(json!({})));
    }

    #[test]
    fn test_arrays_are_leaves() {
        let mut existing = json!({ "tags": [] });
        let report = merge_missing_leaves(&mut existing, &json!({ "tags": ["default"], "list": [1] }));
        assert_eq!(report.inserted, vec!["list".to_string()]);
        assert_eq!(existing, json!({ "tags": [], "list": [1] }));
    }

    #[test]
    fn test_type_conflicts_keep_existing() {
        let mut existing = json!({ "a": { "deep": true }, "b": 5 });
        let report = merge_missing_leaves(&mut existing, &json!({ "a": 1, "b": { "c": 2 } }));

        assert!(!report.changed());
        assert_eq!(report.conflicts, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(existing, json!({ "a": { "deep": true }, "b": 5 }));
    }

    #[test]
    fn test_deep_nesting_beyond_four_levels() {
        let merged = ensure_defaults(
            json!({ "l1": { "l2": { "l3": { "l4": { "kept": 1 } } } } }),
            &json!({ "l1": { "l2": { "l3": { "l4": { "kept": 0, "l5": { "new": true } } } } } }),
        );
        let value = merged.into_changed().expect("a leaf was missing");
        assert_eq!(value["l1"]["l2"]["l3"]["l4"]["kept"], json!(1));
        assert_eq!(value["l1"]["l2"]["l3"]["l4"]["l5"]["new"], json!(true));
    }

    #[test]
    fn test_scalar_existing_with_object_defaults_is_conflict() {
        let mut existing = json!(7);
        let report = merge_missing_leaves(&mut existing, &json!({ "a": 1 }));
        assert!(!report.changed());
        assert_eq!(report.conflicts, vec![String::new()]);
        assert_eq!(existing, json!(7));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::path::get_path;
    use proptest::prelude::*;

    fn leaf_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ]
    }

    fn shape_strategy() -> impl Strategy<Value = Value> {
        leaf_strategy().prop_recursive(3, 24, 4, |inner| {
            prop::collection::btree_map("[a-c]", inner, 1..4)
                .prop_map(|map| Value::Object(map.into_iter().collect()))
        })
    }

    fn leaf_paths(value: &Value, prefix: Vec<String>, out: &mut Vec<Vec<String>>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let mut path = prefix.clone();
                    path.push(key.clone());
                    leaf_paths(child, path, out);
                }
            }
            _ => out.push(prefix),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Property: merging is idempotent.
        #[test]
        fn prop_second_merge_is_unchanged(existing in shape_strategy(), shape in shape_strategy()) {
            let once = match ensure_defaults(existing.clone(), &shape) {
                EnsureDefaults::Changed(value) => value,
                EnsureDefaults::Unchanged => existing,
            };
            prop_assert_eq!(ensure_defaults(once, &shape), EnsureDefaults::Unchanged);
        }

        /// Property: every existing leaf survives the merge unchanged.
        #[test]
        fn prop_existing_leaves_preserved(existing in shape_strategy(), shape in shape_strategy()) {
            let mut merged = existing.clone();
            merge_missing_leaves(&mut merged, &shape);

            let mut paths = Vec::new();
            leaf_paths(&existing, Vec::new(), &mut paths);
            for path in paths {
                prop_assert_eq!(get_path(&merged, &path), get_path(&existing, &path));
            }
        }
    }
}
