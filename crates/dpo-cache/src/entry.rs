//! Cached values with their lifetime

use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use dpo_types::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One cached result
///
/// Entries are never mutated: a new `put` for the same key replaces the
/// whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry was stored under
    pub key: CacheKey,
    /// Cached result
    pub value: Value,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Lifetime measured from `created_at`
    pub ttl: Duration,
    /// Size of the JSON-serialised value in bytes
    pub size: usize,
}

impl CacheEntry {
    /// Wrap a value, stamping the current time and measuring its size
    #[must_use]
    pub fn new(key: CacheKey, value: Value, ttl: Duration) -> Self {
        let size = serde_json::to_vec(&value).map_or(0, |bytes| bytes.len());
        Self {
            key,
            value,
            created_at: Utc::now(),
            ttl,
            size,
        }
    }

    /// Time left before expiry, zero once expired
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let age = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        self.ttl.saturating_sub(age)
    }

    /// Whether the entry is still within its TTL at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.remaining(now).is_zero()
    }
}

/// On-disk envelope for tier-2 blobs
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub(crate) version: u32,
    pub(crate) entry: CacheEntry,
}

impl StoredEntry {
    pub(crate) const VERSION: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_follows_ttl() {
        let entry = CacheEntry::new(CacheKey::named("a"), Value::Int(1), Duration::from_secs(60));
        let now = entry.created_at;
        assert!(entry.is_fresh(now));
        assert!(entry.is_fresh(now + chrono::Duration::seconds(59)));
        assert!(!entry.is_fresh(now + chrono::Duration::seconds(61)));
        assert_eq!(entry.remaining(now + chrono::Duration::seconds(90)), Duration::ZERO);
    }

    #[test]
    fn size_is_json_length() {
        let entry = CacheEntry::new(CacheKey::named("a"), Value::Str("abc".into()), Duration::ZERO);
        assert_eq!(entry.size, serde_json::to_vec(&Value::Str("abc".into())).unwrap().len());
        assert!(!entry.is_fresh(entry.created_at));
    }
}
