use chrono::Utc;
use std::fmt;
use std::time::Duration;

/// Wall-clock instant in Unix milliseconds
///
/// Expirations are stored in this form so a durable log reopened by a later
/// process still compares them against the same clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Captures the current instant
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns this instant shifted forward by `ttl`, saturating at the far end
    pub fn plus(self, ttl: Duration) -> Self {
        let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// One recorded occurrence of a key within a namespace
///
/// Entries are never updated; two puts of the same key produce two entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    namespace: String,
    key: String,
    expiration: Timestamp,
}

impl Entry {
    /// Creates a new entry with the given expiration time
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        expiration: Timestamp,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            expiration,
        }
    }

    /// Creates an entry expiring `ttl` after `now`
    pub fn with_ttl(
        namespace: impl Into<String>,
        key: impl Into<String>,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self::new(namespace, key, now.plus(ttl))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    /// Checks if this entry is still live at `at`
    pub fn is_active_at(&self, at: Timestamp) -> bool {
        self.expiration > at
    }

    /// Checks if this entry has expired at `at`
    pub fn is_stale_at(&self, at: Timestamp) -> bool {
        !self.is_active_at(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_active_before_expiration() {
        let entry = Entry::new("default", "key0", Timestamp::from_millis(1_000));

        assert_eq!(entry.namespace(), "default");
        assert_eq!(entry.key(), "key0");
        assert!(entry.is_active_at(Timestamp::from_millis(999)));
        assert!(!entry.is_stale_at(Timestamp::from_millis(999)));
    }

    #[test]
    fn test_entry_stale_at_expiration_boundary() {
        let entry = Entry::new("default", "key0", Timestamp::from_millis(1_000));

        // Expiration equal to the snapshot is already stale
        assert!(entry.is_stale_at(Timestamp::from_millis(1_000)));
        assert!(entry.is_stale_at(Timestamp::from_millis(5_000)));
    }

    #[test]
    fn test_with_ttl_offsets_expiration() {
        let now = Timestamp::from_millis(10_000);
        let entry = Entry::with_ttl("ns", "k", now, Duration::from_secs(10));

        assert_eq!(entry.expiration(), Timestamp::from_millis(20_000));
    }

    #[test]
    fn test_extreme_ttl_saturates() {
        let now = Timestamp::from_millis(10_000);
        let expiration = now.plus(Duration::MAX);

        assert_eq!(expiration.as_millis(), i64::MAX);
    }
}
