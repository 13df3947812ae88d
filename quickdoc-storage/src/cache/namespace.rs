//! Namespaced cache keys.
//!
//! One cache backend can be shared by a database handle, its children and
//! its tables. Every physical key therefore carries the owning collection's
//! namespace and the entry class, so handles never read each other's
//! entries and a handle can wipe its own entries with one prefix clear.

use std::fmt;

/// Separator between key parts (ASCII unit separator).
pub const SEPARATOR: char = '\u{1f}';

/// Kind of cache entry. Each class has its own TTL window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryClass {
    /// Root payload of one document.
    Entry,
    /// Full-collection listing.
    Snapshot,
    /// Measured store latency.
    Probe,
}

impl EntryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryClass::Entry => "entry",
            EntryClass::Snapshot => "snapshot",
            EntryClass::Probe => "probe",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(EntryClass::Entry),
            "snapshot" => Some(EntryClass::Snapshot),
            "probe" => Some(EntryClass::Probe),
            _ => None,
        }
    }
}

impl fmt::Display for EntryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cache key scoped to one namespace.
///
/// Encodes as `namespace␟class␟key`. Separator characters inside the
/// namespace are replaced with `_`; the key part is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedKey {
    namespace: String,
    class: EntryClass,
    key: String,
}

impl NamespacedKey {
    pub fn new(namespace: &str, class: EntryClass, key: &str) -> Self {
        Self {
            namespace: sanitize(namespace),
            class,
            key: key.to_string(),
        }
    }

    /// Key of a single document's root payload.
    pub fn entry(namespace: &str, key: &str) -> Self {
        Self::new(namespace, EntryClass::Entry, key)
    }

    /// Key of the collection listing.
    pub fn snapshot(namespace: &str) -> Self {
        Self::new(namespace, EntryClass::Snapshot, "all")
    }

    /// Key of the latency probe.
    pub fn probe(namespace: &str) -> Self {
        Self::new(namespace, EntryClass::Probe, "latency")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn class(&self) -> EntryClass {
        self.class
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.namespace,
            self.class.as_str(),
            self.key
        )
    }

    /// Decode an encoded key. Returns `None` for anything `encode` cannot
    /// produce.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.splitn(3, SEPARATOR);
        let namespace = parts.next()?;
        let class = EntryClass::parse(parts.next()?)?;
        let key = parts.next()?;
        Some(Self {
            namespace: namespace.to_string(),
            class,
            key: key.to_string(),
        })
    }

    /// Prefix shared by every key of a namespace.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}{SEPARATOR}", sanitize(namespace))
    }

    /// Prefix shared by every key of one class in a namespace.
    pub fn class_prefix(namespace: &str, class: EntryClass) -> String {
        format!("{}{SEPARATOR}{}{SEPARATOR}", sanitize(namespace), class.as_str())
    }
}

impl fmt::Display for NamespacedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.class, self.key)
    }
}

fn sanitize(namespace: &str) -> String {
    namespace.replace(SEPARATOR, "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = NamespacedKey::entry("JSON", "user");
        let decoded = NamespacedKey::decode(&key.encode()).expect("decode should succeed");
        assert_eq!(key, decoded);
        assert_eq!(decoded.class(), EntryClass::Entry);
    }

    #[test]
    fn test_reserved_classes_do_not_collide_with_entries() {
        let snapshot = NamespacedKey::snapshot("JSON");
        let entry_named_all = NamespacedKey::entry("JSON", "all");
        assert_ne!(snapshot.encode(), entry_named_all.encode());
    }

    #[test]
    fn test_different_namespaces_different_keys() {
        assert_ne!(
            NamespacedKey::entry("JSON", "a").encode(),
            NamespacedKey::entry("users", "a").encode()
        );
    }

    #[test]
    fn test_namespace_prefix_is_prefix() {
        let key = NamespacedKey::probe("JSON").encode();
        assert!(key.starts_with(&NamespacedKey::namespace_prefix("JSON")));
        assert!(key.starts_with(&NamespacedKey::class_prefix("JSON", EntryClass::Probe)));
        assert!(!key.starts_with(&NamespacedKey::namespace_prefix("JSO")));
    }

    #[test]
    fn test_separator_in_namespace_is_replaced() {
        let key = NamespacedKey::entry("a\u{1f}b", "k");
        assert_eq!(key.namespace(), "a_b");
        assert_eq!(NamespacedKey::decode(&key.encode()), Some(key));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NamespacedKey::decode("no-separators").is_none());
        assert!(NamespacedKey::decode("JSON\u{1f}bogus\u{1f}k").is_none());
    }
}
