//! Collection listings.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use quickdoc_core::path::{get_path, segments};
use quickdoc_core::{Entry, QuickDocResult};
use serde_json::Value;
use tracing::debug;

use crate::database::Database;

/// Row predicate for [`Database::all`]: the entry and its position in the
/// unexpired listing.
pub type EntryFilter = Arc<dyn Fn(&Entry, usize) -> bool + Send + Sync>;

/// Options for [`Database::all`]. Applied as filter, then sort, then limit.
#[derive(Clone, Default)]
pub struct AllOptions {
    /// Keep at most this many rows. Zero means no limit.
    pub limit: Option<usize>,
    /// Dotted path into each row's data; rows are returned in descending
    /// order of the value found there.
    pub sort: Option<String>,
    pub filter: Option<EntryFilter>,
}

impl fmt::Debug for AllOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllOptions")
            .field("limit", &self.limit)
            .field("sort", &self.sort)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl AllOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, path: impl Into<String>) -> Self {
        self.sort = Some(path.into());
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Entry, usize) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Apply filter, sort and limit to an unexpired listing.
    pub fn apply(&self, entries: Vec<Entry>) -> Vec<Entry> {
        let mut rows: Vec<Entry> = match &self.filter {
            Some(filter) => entries
                .into_iter()
                .enumerate()
                .filter(|(index, entry)| filter(entry, *index))
                .map(|(_, entry)| entry)
                .collect(),
            None => entries,
        };

        if let Some(sort) = &self.sort {
            let path = segments(sort);
            rows.sort_by(|a, b| compare_values(get_path(&a.data, &path), get_path(&b.data, &path)));
            rows.reverse();
        }

        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            rows.truncate(limit);
        }
        rows
    }
}

impl Database {
    /// Every unexpired `{ID, data}` row, shaped by `options`.
    ///
    /// A fresh cached listing answers when there is one; otherwise the
    /// store is scanned and the listing (unfiltered) is cached again.
    pub async fn all(&self, options: &AllOptions) -> QuickDocResult<Vec<Entry>> {
        let binding = self.binding()?;

        let entries = match binding.cached_snapshot().await {
            Some(entries) => entries,
            None => {
                let documents = binding.store.find_all().await?;
                let entries: Vec<Entry> = documents
                    .iter()
                    .filter(|doc| !doc.is_expired())
                    .map(|doc| doc.to_entry())
                    .collect();
                debug!(collection = %binding.collection(), rows = entries.len(), "Scanned collection");
                binding.cache_snapshot(&entries).await;
                entries
            }
        };

        Ok(options.apply(entries))
    }
}

/// Ascending order: missing < null < bool < number < string < array < object.
///
/// Numbers compare numerically, strings by code point and arrays element by
/// element. Objects of equal rank compare equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = |value: Option<&Value>| match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    };

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(Some(x), Some(y)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}
