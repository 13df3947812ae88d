//! Array mutations at a key.

use quickdoc_core::{PathAddress, QuickDocError, QuickDocResult};
use serde_json::Value;

use crate::database::Database;
use crate::ops::select;

/// Remove the elements `value` matches. Returns true if any were removed.
fn remove_matches(items: &mut Vec<Value>, value: &Value, all_occurrences: bool) -> bool {
    let before = items.len();
    match value {
        Value::Array(candidates) => items.retain(|item| !candidates.contains(item)),
        _ if all_occurrences => items.retain(|item| item != value),
        _ => {
            if let Some(index) = items.iter().position(|item| item == value) {
                items.remove(index);
            }
        }
    }
    items.len() != before
}

impl Database {
    /// Append `value` to the array at `key` and return the new array.
    ///
    /// An absent key starts a new array; an array `value` is concatenated.
    /// Fails with `TargetExpectedArray` if `key` holds anything else. With
    /// `force_fetch` the current array is read from the store.
    pub async fn push(
        &self,
        key: &str,
        value: impl Into<Value>,
        force_fetch: bool,
    ) -> QuickDocResult<Option<Value>> {
        let value = value.into();
        let binding = self.binding()?;
        let address = PathAddress::parse(key)?;
        {
            let _guard = self.lock_root(&binding, address.master()).await;
            let payload = self
                .root_payload(&binding, address.master(), force_fetch)
                .await?;

            let next = match (select(&address, payload.as_ref()), value) {
                (None, Value::Array(values)) => values,
                (None, value) => vec![value],
                (Some(Value::Array(mut items)), Value::Array(values)) => {
                    items.extend(values);
                    items
                }
                (Some(Value::Array(mut items)), value) => {
                    items.push(value);
                    items
                }
                (Some(_), _) => {
                    return Err(QuickDocError::TargetExpectedArray {
                        key: key.to_string(),
                    })
                }
            };

            self.write_value(&binding, &address, Value::Array(next), None)
                .await?;
        }
        self.get(key, false).await
    }

    /// Elements of the array at `key` that `predicate` accepts, in order.
    ///
    /// Read only, through the cache like [`Database::get`]. `None` when `key`
    /// is absent; fails with `TargetExpectedArray` if `key` holds a
    /// non-array.
    pub async fn filter<F>(&self, key: &str, predicate: F) -> QuickDocResult<Option<Value>>
    where
        F: Fn(&Value) -> bool,
    {
        match self.get(key, false).await? {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(Value::Array(
                items.into_iter().filter(|item| predicate(item)).collect(),
            ))),
            Some(_) => Err(QuickDocError::TargetExpectedArray {
                key: key.to_string(),
            }),
        }
    }

    /// Elements of the array at `key` equal to `value`. Elements compare
    /// structurally.
    pub async fn filter_eq(
        &self,
        key: &str,
        value: impl Into<Value>,
    ) -> QuickDocResult<Option<Value>> {
        let value = value.into();
        self.filter(key, |item| *item == value).await
    }

    /// Remove `value` from the array at `key` and return the new array.
    ///
    /// An array `value` removes every element equal to one of its members. A
    /// single value removes every equal element when `all_occurrences` is
    /// set and only the first one otherwise. Elements compare structurally.
    ///
    /// Returns `None` without writing when `key` is absent, or when a single
    /// first-match removal finds nothing. Fails with `TargetExpectedArray` if
    /// `key` holds a non-array.
    pub async fn pull(
        &self,
        key: &str,
        value: impl Into<Value>,
        all_occurrences: bool,
    ) -> QuickDocResult<Option<Value>> {
        let value = value.into();
        let binding = self.binding()?;
        let address = PathAddress::parse(key)?;
        {
            let _guard = self.lock_root(&binding, address.master()).await;
            let payload = self.root_payload(&binding, address.master(), false).await?;

            let mut items = match select(&address, payload.as_ref()) {
                None => return Ok(None),
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(QuickDocError::TargetExpectedArray {
                        key: key.to_string(),
                    })
                }
            };

            let removed = remove_matches(&mut items, &value, all_occurrences);
            let single_match = !value.is_array() && !all_occurrences;
            if single_match && !removed {
                return Ok(None);
            }

            self.write_value(&binding, &address, Value::Array(items), None)
                .await?;
        }
        self.get(key, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            other => vec![other],
        }
    }

    #[test]
    fn test_remove_first_only() {
        let mut list = items(json!([1, 2, 1, 3]));
        assert!(remove_matches(&mut list, &json!(1), false));
        assert_eq!(list, items(json!([2, 1, 3])));
    }

    #[test]
    fn test_remove_all_occurrences() {
        let mut list = items(json!([1, 2, 1, 3]));
        assert!(remove_matches(&mut list, &json!(1), true));
        assert_eq!(list, items(json!([2, 3])));
    }

    #[test]
    fn test_remove_members_of_array() {
        let mut list = items(json!(["a", "b", "c", "a"]));
        assert!(remove_matches(&mut list, &json!(["a", "c"]), false));
        assert_eq!(list, items(json!(["b"])));
    }

    #[test]
    fn test_remove_compares_structurally() {
        let mut list = items(json!([{ "id": 1 }, { "id": 2 }]));
        assert!(remove_matches(&mut list, &json!({ "id": 2 }), true));
        assert_eq!(list, items(json!([{ "id": 1 }])));
    }

    #[test]
    fn test_remove_nothing() {
        let mut list = items(json!([1, 2]));
        assert!(!remove_matches(&mut list, &json!(9), false));
        assert_eq!(list.len(), 2);
    }
}
