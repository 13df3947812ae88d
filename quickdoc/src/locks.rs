//! Per-root-key write locks.
//!
//! Compound mutations (read a document, change it, write it back) hold the
//! lock of their root key for the whole round trip, so two mutations of the
//! same document from one process never interleave. Different root keys
//! never contend. A handle and every handle derived from it share one
//! [`KeyLocks`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held while a root key is locked. Dropping it releases the key.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Striped async mutexes keyed by `(scope, root key)`.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    slots: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key` within `scope`.
    ///
    /// `scope` is the collection namespace, so equal root keys in different
    /// collections do not contend.
    pub async fn lock(&self, scope: &str, key: &str) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(slot_name(scope, key))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn slot_name(scope: &str, key: &str) -> String {
    format!("{scope}\u{1f}{key}")
}
