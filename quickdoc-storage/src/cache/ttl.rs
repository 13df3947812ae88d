//! TTL windows per cache entry class.

use std::time::Duration;

use chrono::{DateTime, Utc};
use quickdoc_core::TtlPolicy;

use super::namespace::EntryClass;

/// How long entries of one class stay fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlWindow {
    /// Never cached: reads always miss and writes are skipped.
    Disabled,
    /// Cached until removed.
    Forever,
    /// Fresh for this long after caching.
    Within(Duration),
}

impl TtlWindow {
    /// Build from signed milliseconds: negative disables, zero is forever.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Self::Disabled,
            0 => Self::Forever,
            ms => Self::Within(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// True if an entry cached at `cached_at` is still fresh at `now`.
    ///
    /// A `cached_at` in the future (clock skew between processes sharing a
    /// backend) counts as age zero.
    pub fn is_fresh(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Disabled => false,
            Self::Forever => true,
            Self::Within(window) => {
                let age = (now - cached_at).to_std().unwrap_or(Duration::ZERO);
                age < *window
            }
        }
    }
}

/// The three TTL windows of a cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlSet {
    pub read: TtlWindow,
    pub snapshot: TtlWindow,
    pub probe: TtlWindow,
}

impl TtlSet {
    pub fn window(&self, class: EntryClass) -> TtlWindow {
        match class {
            EntryClass::Entry => self.read,
            EntryClass::Snapshot => self.snapshot,
            EntryClass::Probe => self.probe,
        }
    }
}

impl From<TtlPolicy> for TtlSet {
    fn from(policy: TtlPolicy) -> Self {
        Self {
            read: TtlWindow::from_millis(policy.read_ms),
            snapshot: TtlWindow::from_millis(policy.snapshot_ms),
            probe: TtlWindow::from_millis(policy.probe_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis() {
        assert_eq!(TtlWindow::from_millis(-1), TtlWindow::Disabled);
        assert_eq!(TtlWindow::from_millis(i64::MIN), TtlWindow::Disabled);
        assert_eq!(TtlWindow::from_millis(0), TtlWindow::Forever);
        assert_eq!(
            TtlWindow::from_millis(1500),
            TtlWindow::Within(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_freshness_boundaries() {
        let now = Utc::now();
        let window = TtlWindow::Within(Duration::from_secs(60));

        assert!(window.is_fresh(now, now));
        assert!(window.is_fresh(now - chrono::Duration::seconds(59), now));
        assert!(!window.is_fresh(now - chrono::Duration::seconds(60), now));
        assert!(window.is_fresh(now + chrono::Duration::seconds(5), now));

        assert!(TtlWindow::Forever.is_fresh(now - chrono::Duration::days(365), now));
        assert!(!TtlWindow::Disabled.is_fresh(now, now));
    }

    #[test]
    fn test_set_from_policy() {
        let set = TtlSet::from(TtlPolicy::default().with_snapshot_ms(-1).with_probe_ms(0));
        assert_eq!(set.window(EntryClass::Entry), TtlWindow::from_millis(300_000));
        assert!(!set.window(EntryClass::Snapshot).is_enabled());
        assert_eq!(set.window(EntryClass::Probe), TtlWindow::Forever);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: a positive window is fresh strictly before it elapses
        #[test]
        fn prop_window_threshold(window_ms in 1i64..10_000_000, age_ms in 0i64..20_000_000) {
            let now = Utc::now();
            let cached_at = now - chrono::Duration::milliseconds(age_ms);
            let fresh = TtlWindow::from_millis(window_ms).is_fresh(cached_at, now);
            prop_assert_eq!(fresh, age_ms < window_ms);
        }
    }
}
