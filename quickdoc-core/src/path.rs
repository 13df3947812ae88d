//! Dotted-path addressing over JSON documents.
//!
//! A key such as `user.profile.name` addresses the document whose ID is
//! `user` (the *master*) and, inside its `data`, the nested field
//! `profile.name` (the *target*). The helpers in this module read, write and
//! remove values along such paths without any I/O.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{QuickDocError, QuickDocResult};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Largest numeric segment treated as an array index.
///
/// Bigger numeric segments address object fields, which keeps a hostile key
/// from forcing a huge padded array allocation.
pub const MAX_ARRAY_INDEX: usize = u16::MAX as usize;

/// A parsed dotted key.
///
/// Construction goes through [`PathAddress::parse`], which guarantees a
/// non-empty master and non-empty child segments. `target` is empty exactly
/// when the key has no separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathAddress {
    master: String,
    child: Vec<String>,
    target: String,
}

impl PathAddress {
    /// Split a key into master and child segments.
    ///
    /// Fails with `InvalidKey` for an empty key or a key containing an empty
    /// segment (`".a"`, `"a."`, `"a..b"`).
    pub fn parse(key: &str) -> QuickDocResult<Self> {
        if key.is_empty() {
            return Err(invalid_key(key, "key must not be empty"));
        }

        let mut segments = key.split(PATH_SEPARATOR);
        let master = segments.next().unwrap_or_default();
        if master.is_empty() {
            return Err(invalid_key(key, "root key must not be empty"));
        }

        let child: Vec<String> = segments.map(str::to_string).collect();
        if child.iter().any(String::is_empty) {
            return Err(invalid_key(key, "path segments must not be empty"));
        }

        let target = child.join(".");
        Ok(Self {
            master: master.to_string(),
            child,
            target,
        })
    }

    /// The root document identifier.
    pub fn master(&self) -> &str {
        &self.master
    }

    /// Path segments below the root.
    pub fn child(&self) -> &[String] {
        &self.child
    }

    /// Child segments joined with `.`; empty for a bare root key.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// True if the key addresses a whole document.
    pub fn is_root(&self) -> bool {
        self.child.is_empty()
    }

    /// Select the addressed value from a root document's data.
    ///
    /// A bare key selects the whole document.
    pub fn pick<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        if self.is_root() {
            return Some(document);
        }
        get_path(document, &self.child)
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target.is_empty() {
            write!(f, "{}", self.master)
        } else {
            write!(f, "{}{}{}", self.master, PATH_SEPARATOR, self.target)
        }
    }
}

/// Parse `key` and select its value from `document`.
pub fn pick<'a>(document: &'a Value, key: &str) -> QuickDocResult<Option<&'a Value>> {
    Ok(PathAddress::parse(key)?.pick(document))
}

/// Split a dotted path (no master) into segments, dropping a leading `.`.
pub fn segments(path: &str) -> Vec<&str> {
    path.strip_prefix(PATH_SEPARATOR)
        .unwrap_or(path)
        .split(PATH_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect()
}

fn invalid_key(key: &str, reason: &str) -> QuickDocError {
    QuickDocError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment
        .parse::<usize>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
}

/// Navigate `value` along `path`, returning `None` if any step is missing.
pub fn get_path<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        let segment = segment.as_ref();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(parse_index(segment)?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// True if every step of `path` exists in `value` (a stored `null` counts).
pub fn has_path<S: AsRef<str>>(value: &Value, path: &[S]) -> bool {
    get_path(value, path).is_some()
}

/// Write `new_value` at `path`, creating or replacing intermediates.
///
/// Missing intermediates become arrays when the next segment is an index and
/// objects otherwise. Intermediates that cannot hold the next segment are
/// replaced.
pub fn set_path<S: AsRef<str>>(value: &mut Value, path: &[S], new_value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *value = new_value;
        return;
    };
    let head = head.as_ref();
    let index = parse_index(head);

    let fits = match value {
        Value::Object(_) => true,
        Value::Array(_) => index.is_some(),
        _ => false,
    };
    if !fits {
        *value = match index {
            Some(_) => Value::Array(Vec::new()),
            None => Value::Object(Map::new()),
        };
    }

    match (value, index) {
        (Value::Array(items), Some(index)) => {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            set_path(&mut items[index], rest, new_value);
        }
        (Value::Object(map), _) => {
            let slot = map.entry(head.to_string()).or_insert(Value::Null);
            set_path(slot, rest, new_value);
        }
        _ => {}
    }
}

/// Depth of the first value along `path` that cannot take the next segment:
/// a scalar, or an array under a non-index segment.
///
/// `None` when writing `path` would only walk or create containers. Absent
/// and `null` values never block.
pub fn blocked_prefix<S: AsRef<str>>(value: &Value, path: &[S]) -> Option<usize> {
    let mut current = value;
    for (depth, segment) in path.iter().enumerate() {
        let segment = segment.as_ref();
        let next = match current {
            Value::Null => return None,
            Value::Object(map) => map.get(segment),
            Value::Array(items) => match parse_index(segment) {
                Some(index) => items.get(index),
                None => return Some(depth),
            },
            _ => return Some(depth),
        };
        current = next?;
    }
    None
}

/// Remove the value at `path`. Returns true if something was removed.
///
/// Array elements are nulled rather than shifted so sibling indices keep
/// addressing the same elements.
pub fn unset_path<S: AsRef<str>>(value: &mut Value, path: &[S]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };

    let mut current = value;
    for segment in parents {
        let segment = segment.as_ref();
        let next = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => parse_index(segment).and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return false,
        }
    }

    let last = last.as_ref();
    match current {
        Value::Object(map) => map.remove(last).is_some(),
        Value::Array(items) => match parse_index(last).and_then(|i| items.get_mut(i)) {
            Some(slot) => {
                *slot = Value::Null;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Short type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
