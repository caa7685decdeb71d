//! Eviction Policy
//!
//! Two independent removal triggers for bounded tiers:
//!
//! - **TTL expiry** — checked lazily on read and eagerly by the sweeper
//! - **capacity eviction** — at capacity, the entry with the oldest
//!   last-access timestamp is removed (pure LRU, not LFU)
//!
//! There is no pinning: entries with in-flight readers are still evictable,
//! since readers hold their own clones.

use chrono::{DateTime, Utc};

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Least-recently-used victim selection plus TTL expiry checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy;

impl EvictionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Pick the eviction victim among `entries`: oldest `last_accessed_at`,
    /// with `cached_at` and then the key text as deterministic tie-breaks.
    pub fn select_victim<'a, I>(&self, entries: I) -> Option<CacheKey>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        entries
            .into_iter()
            .min_by(|a, b| {
                a.last_accessed_at
                    .cmp(&b.last_accessed_at)
                    .then(a.cached_at.cmp(&b.cached_at))
                    .then(a.key.as_str().cmp(b.key.as_str()))
            })
            .map(|entry| entry.key.clone())
    }

    /// True once the entry's staleness deadline has passed.
    #[inline]
    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_expired_at(now)
    }

    /// Keys of all entries expired as of `now` (sweep candidates).
    pub fn expired_keys<'a, I>(&self, entries: I, now: DateTime<Utc>) -> Vec<CacheKey>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        entries
            .into_iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyGenerator, Namespace};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    fn make_entry(id: &str, ttl_secs: u64) -> CacheEntry {
        let key = KeyGenerator::new()
            .generate(Namespace::Transcript, &json!({ "video_id": id }))
            .unwrap();
        CacheEntry::new(key, json!({ "id": id }), Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_victim_is_least_recently_accessed() {
        let policy = EvictionPolicy::new();

        let mut old = make_entry("old", 600);
        old.last_accessed_at = old.cached_at - ChronoDuration::seconds(120);
        // keep the invariant last_accessed_at >= cached_at intact
        old.cached_at = old.last_accessed_at;

        let fresh = make_entry("fresh", 600);

        let victim = policy.select_victim([&fresh, &old]).unwrap();
        assert_eq!(victim, old.key);
    }

    #[test]
    fn test_victim_tie_break_is_deterministic() {
        let policy = EvictionPolicy::new();

        let mut a = make_entry("aaa", 600);
        let mut b = make_entry("bbb", 600);
        let tied = a.cached_at.min(b.cached_at);
        a.cached_at = tied;
        a.last_accessed_at = tied;
        b.cached_at = tied;
        b.last_accessed_at = tied;

        let expected = if a.key.as_str() < b.key.as_str() {
            a.key.clone()
        } else {
            b.key.clone()
        };

        assert_eq!(policy.select_victim([&a, &b]).unwrap(), expected);
        assert_eq!(policy.select_victim([&b, &a]).unwrap(), expected);
    }

    #[test]
    fn test_no_victim_in_empty_set() {
        let policy = EvictionPolicy::new();
        assert!(policy.select_victim(std::iter::empty()).is_none());
    }

    #[test]
    fn test_expired_keys() {
        let policy = EvictionPolicy::new();

        let live = make_entry("live", 600);
        let dead = make_entry("dead", 1);
        let now = dead.expires_at + ChronoDuration::seconds(1);

        let expired = policy.expired_keys([&live, &dead], now);
        assert_eq!(expired, vec![dead.key.clone()]);
        assert!(policy.is_expired(&dead, now));
        assert!(!policy.is_expired(&live, now));
    }
}
