//! Key operations.
//!
//! Reads go cache first, then store. Writes go to the store first and only
//! refresh the cache after the store accepted them. Compound mutations hold
//! the root key's lock from the read to the write.

use std::time::Instant;

use chrono::Utc;
use quickdoc_core::path::{blocked_prefix, get_path, has_path, set_path, type_name, unset_path};
use quickdoc_core::{
    expiry_from_seconds, merge_missing_leaves, ExpiryUpdate, PathAddress, QuickDocError,
    QuickDocResult, Timestamp,
};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::database::{Binding, Database, PING_KEY};

impl Database {
    // ========================================================================
    // READS
    // ========================================================================

    /// Value at `key`, or `None` if absent, expired or stored as `null`.
    ///
    /// With `force_fetch` the cache is bypassed and refreshed from the store.
    pub async fn get(&self, key: &str, force_fetch: bool) -> QuickDocResult<Option<Value>> {
        let binding = self.binding()?;
        let address = PathAddress::parse(key)?;
        let payload = self
            .root_payload(&binding, address.master(), force_fetch)
            .await?;
        Ok(select(&address, payload.as_ref()))
    }

    /// [`Database::get`] straight from the store.
    pub async fn fetch(&self, key: &str) -> QuickDocResult<Option<Value>> {
        self.get(key, true).await
    }

    /// True if `get` would return a value.
    pub async fn has(&self, key: &str, force_fetch: bool) -> QuickDocResult<bool> {
        Ok(self.get(key, force_fetch).await?.is_some())
    }

    /// Document count.
    ///
    /// Without `force_fetch` a fresh cached listing answers; otherwise the
    /// store's estimate does, which may include expired documents the store
    /// has not swept yet.
    pub async fn count(&self, force_fetch: bool) -> QuickDocResult<u64> {
        let binding = self.binding()?;
        if !force_fetch {
            if let Some(entries) = binding.cached_snapshot().await {
                return Ok(entries.len() as u64);
            }
        }
        Ok(binding.store.estimated_count().await?)
    }

    /// Store round-trip latency in milliseconds.
    ///
    /// Without `force_fetch` the last measurement is returned while its probe
    /// window lasts.
    pub async fn ping(&self, force_fetch: bool) -> QuickDocResult<u64> {
        let binding = self.binding()?;
        if !force_fetch {
            if let Some(latency_ms) = binding.cached_latency().await {
                return Ok(latency_ms);
            }
        }

        let started = Instant::now();
        self.root_payload(&binding, PING_KEY, true).await?;
        let elapsed = started.elapsed();
        binding.record_latency(elapsed).await;
        Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    /// Root payload of `root_key`, from cache unless forced.
    ///
    /// A store read refreshes the cache entry and the latency probe.
    pub(crate) async fn root_payload(
        &self,
        binding: &Binding,
        root_key: &str,
        force_fetch: bool,
    ) -> QuickDocResult<Option<Value>> {
        if !force_fetch {
            if let Some(payload) = binding.cached(root_key).await {
                return Ok(Some(payload));
            }
        }

        let started = Instant::now();
        let document = binding.store.find_by_id(root_key).await?;
        binding.record_latency(started.elapsed()).await;

        match document.filter(|doc| !doc.is_expired()) {
            Some(document) => {
                binding
                    .cache_put(root_key, document.data.clone(), document.expire_at)
                    .await;
                Ok(Some(document.data))
            }
            None => {
                binding.cache_drop(root_key).await;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store `value` at `key` without expiry and return what `get` now sees.
    ///
    /// A dotted key writes into the root document, creating it if needed;
    /// siblings are kept. Fails with `CannotTargetNonObject` if the root
    /// holds a scalar or an array.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> QuickDocResult<Option<Value>> {
        self.store_value(key, value.into(), None).await
    }

    /// [`Database::set`] with a time to live in seconds.
    ///
    /// Zero, negative or NaN TTLs never expire. On a dotted key the expiry
    /// applies to the whole root document.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: impl Into<Value>,
        ttl_seconds: f64,
    ) -> QuickDocResult<Option<Value>> {
        let expire_at = expiry_from_seconds(ttl_seconds, Utc::now());
        self.store_value(key, value.into(), expire_at).await
    }

    async fn store_value(
        &self,
        key: &str,
        value: Value,
        expire_at: Option<Timestamp>,
    ) -> QuickDocResult<Option<Value>> {
        let binding = self.binding()?;
        let address = PathAddress::parse(key)?;
        {
            let _guard = self.lock_root(&binding, address.master()).await;
            self.write_value(&binding, &address, value, expire_at).await?;
        }
        self.get(key, false).await
    }

    /// Write `value` at `address`. The caller holds the root key's lock.
    ///
    /// Returns false when a store failure was swallowed.
    pub(crate) async fn write_value(
        &self,
        binding: &Binding,
        address: &PathAddress,
        value: Value,
        expire_at: Option<Timestamp>,
    ) -> QuickDocResult<bool> {
        let existing = self.load_live(binding, address.master()).await?;
        let expiry = match expire_at {
            Some(at) => ExpiryUpdate::Set(Some(at)),
            None => ExpiryUpdate::Keep,
        };

        let data = if address.is_root() {
            value
        } else {
            let mut data = object_root(address, existing.as_ref().map(|doc| &doc.data))?;
            set_path(&mut data, address.child(), value);
            data
        };

        self.persist(binding, address.master(), data, expiry, existing.as_ref())
            .await
    }

    /// Remove `key`.
    ///
    /// A bare key deletes the document and returns whether a live one was
    /// removed. A dotted key removes the field and returns true whenever the
    /// root document exists.
    pub async fn delete(&self, key: &str) -> QuickDocResult<bool> {
        let binding = self.binding()?;
        let address = PathAddress::parse(key)?;
        let _guard = self.lock_root(&binding, address.master()).await;

        let existing = self.load_live(&binding, address.master()).await?;

        if address.is_root() {
            binding.cache_drop(address.master()).await;
            let deleted = binding.store.delete_one(address.master()).await;
            let removed = self.absorb_write(&binding, key, deleted)?.unwrap_or(0);
            return Ok(removed > 0 && existing.is_some());
        }

        let Some(existing) = existing else {
            return Ok(false);
        };
        let mut data = object_root(&address, Some(&existing.data))?;
        unset_path(&mut data, address.child());

        self.persist(
            &binding,
            address.master(),
            data,
            ExpiryUpdate::Keep,
            Some(&existing),
        )
        .await?;
        Ok(true)
    }

    /// Delete every document and this handle's cache entries.
    ///
    /// Returns whether anything was removed.
    pub async fn delete_all(&self) -> QuickDocResult<bool> {
        let binding = self.binding()?;
        binding.cache_clear().await;
        let deleted = binding.store.delete_many().await;
        let removed = self.absorb_write(&binding, "*", deleted)?.unwrap_or(0);
        debug!(collection = %binding.collection(), removed, "Deleted all documents");
        Ok(removed > 0)
    }

    /// Drop the collection and this handle's cache entries.
    pub async fn drop(&self) -> QuickDocResult<bool> {
        let binding = self.binding()?;
        binding.cache_clear().await;
        let dropped = binding.store.drop_collection().await;
        Ok(self.absorb_write(&binding, "*", dropped)?.is_some())
    }

    /// Insert the leaves of `defaults` missing at `key`.
    ///
    /// Existing values are never overwritten, including values whose kind
    /// differs from the default and scalars sitting where `key` needs an
    /// object (those are logged). Returns whether anything was inserted and
    /// written.
    pub async fn ensure(&self, key: &str, defaults: impl Into<Value>) -> QuickDocResult<bool> {
        let binding = self.binding()?;
        let defaults = defaults.into();
        if defaults.is_null() {
            return Err(QuickDocError::MissingDefault {
                key: key.to_string(),
            });
        }

        let address = PathAddress::parse(key)?;
        let _guard = self.lock_root(&binding, address.master()).await;

        let existing = self.load_live(&binding, address.master()).await?;
        let mut data = match existing.as_ref().map(|doc| &doc.data) {
            Some(data @ Value::Object(_)) => data.clone(),
            _ => Value::Object(Map::new()),
        };

        let changed = if address.is_root() {
            let report = merge_missing_leaves(&mut data, &defaults);
            log_conflicts(key, &report.conflicts);
            report.changed()
        } else if has_path(&data, address.child()) {
            let mut current = get_path(&data, address.child())
                .cloned()
                .unwrap_or(Value::Null);
            let report = merge_missing_leaves(&mut current, &defaults);
            log_conflicts(key, &report.conflicts);
            if report.changed() {
                set_path(&mut data, address.child(), current);
            }
            report.changed()
        } else if let Some(depth) = blocked_prefix(&data, address.child()) {
            let blocked = std::iter::once(address.master())
                .chain(address.child()[..depth].iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(".");
            log_conflicts(key, &[blocked]);
            false
        } else {
            set_path(&mut data, address.child(), defaults);
            true
        };

        if !changed {
            return Ok(false);
        }

        self.persist(
            &binding,
            address.master(),
            data,
            ExpiryUpdate::Keep,
            existing.as_ref(),
        )
        .await
    }

    // ========================================================================
    // NUMBERS
    // ========================================================================

    /// Add `value` to the number at `key`; a non-number counts as 0.
    ///
    /// Fails with `TypeMismatch` unless `value` is a number.
    pub async fn add(&self, key: &str, value: impl Into<Value>) -> QuickDocResult<Option<Value>> {
        self.apply_delta(key, value.into(), false).await
    }

    /// Subtract `value` from the number at `key`; a non-number counts as 0.
    pub async fn subtract(
        &self,
        key: &str,
        value: impl Into<Value>,
    ) -> QuickDocResult<Option<Value>> {
        self.apply_delta(key, value.into(), true).await
    }

    async fn apply_delta(
        &self,
        key: &str,
        operand: Value,
        subtract: bool,
    ) -> QuickDocResult<Option<Value>> {
        let binding = self.binding()?;
        let operand = match operand {
            Value::Number(number) => number,
            other => return Err(type_mismatch(key, "number", &other)),
        };

        let address = PathAddress::parse(key)?;
        {
            let _guard = self.lock_root(&binding, address.master()).await;
            let payload = self.root_payload(&binding, address.master(), false).await?;
            let current = match select(&address, payload.as_ref()) {
                Some(Value::Number(number)) => number,
                _ => Number::from(0),
            };

            let next = combine(&current, &operand, subtract).ok_or_else(|| {
                QuickDocError::TypeMismatch {
                    key: key.to_string(),
                    expected: "finite number".to_string(),
                    got: "non-finite result".to_string(),
                }
            })?;
            self.write_value(&binding, &address, Value::Number(next), None)
                .await?;
        }
        self.get(key, false).await
    }
}

/// The addressed value, with a stored `null` reading as absent.
pub(crate) fn select(address: &PathAddress, payload: Option<&Value>) -> Option<Value> {
    payload
        .and_then(|payload| address.pick(payload))
        .filter(|value| !value.is_null())
        .cloned()
}

/// Root data a dotted key can write into: an object, or a fresh one for an
/// absent or `null` root.
fn object_root(address: &PathAddress, data: Option<&Value>) -> QuickDocResult<Value> {
    match data {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(data @ Value::Object(_)) => Ok(data.clone()),
        Some(_) => Err(QuickDocError::CannotTargetNonObject {
            key: address.to_string(),
        }),
    }
}

pub(crate) fn type_mismatch(key: &str, expected: &str, got: &Value) -> QuickDocError {
    QuickDocError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        got: type_name(got).to_string(),
    }
}

/// Integer arithmetic when both sides are integers and it fits, `f64`
/// otherwise. `None` for a non-finite result.
fn combine(current: &Number, operand: &Number, subtract: bool) -> Option<Number> {
    if let (Some(a), Some(b)) = (current.as_i64(), operand.as_i64()) {
        let exact = if subtract {
            a.checked_sub(b)
        } else {
            a.checked_add(b)
        };
        if let Some(result) = exact {
            return Some(Number::from(result));
        }
    }

    let a = current.as_f64()?;
    let b = operand.as_f64()?;
    Number::from_f64(if subtract { a - b } else { a + b })
}

fn log_conflicts(key: &str, conflicts: &[String]) {
    if !conflicts.is_empty() {
        warn!(key = %key, conflicts = ?conflicts, "Existing values kept over defaults of another type");
    }
}
