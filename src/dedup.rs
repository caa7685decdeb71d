//! Batch Deduplication
//!
//! Before a batch pipeline spends producer quota on a list of work items
//! (for example freshly discovered video ids), the filter drops every item
//! that is already cached in any tier or already being produced by another
//! in-flight batch.
//!
//! Error discipline is fail-open: if an item's key cannot be derived or a
//! tier probe fails, the item stays in the batch. A duplicate producer call
//! costs quota; a silently skipped item loses data. False negatives are
//! therefore never produced, while a borderline-expired entry may be
//! re-fetched (an accepted false positive).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::coordinator::CacheCoordinator;
use crate::key::{CacheKey, KeyGenerator, Namespace};

/// How long an in-flight mark shields an item before it is considered
/// abandoned (a crashed producer must not poison an id forever).
pub const DEFAULT_IN_FLIGHT_TTL: Duration = Duration::from_secs(5 * 60);

/// Filters batches of candidate work items against the cache and the set of
/// items currently being produced.
pub struct DeduplicationFilter {
    cache: Arc<CacheCoordinator>,
    keys: KeyGenerator,
    /// Items being produced right now, with their staleness deadline.
    in_flight: DashMap<CacheKey, DateTime<Utc>>,
    in_flight_ttl: Duration,

    checked: AtomicU64,
    already_cached: AtomicU64,
    in_flight_skips: AtomicU64,
}

impl DeduplicationFilter {
    /// Create over a coordinator with the default in-flight shield.
    pub fn new(cache: Arc<CacheCoordinator>) -> Self {
        Self::with_in_flight_ttl(cache, DEFAULT_IN_FLIGHT_TTL)
    }

    /// Create with a custom in-flight staleness deadline.
    pub fn with_in_flight_ttl(cache: Arc<CacheCoordinator>, in_flight_ttl: Duration) -> Self {
        Self {
            cache,
            keys: KeyGenerator::new(),
            in_flight: DashMap::new(),
            in_flight_ttl,
            checked: AtomicU64::new(0),
            already_cached: AtomicU64::new(0),
            in_flight_skips: AtomicU64::new(0),
        }
    }

    /// Return only the items not already cached (non-expired, any tier) and
    /// not already in flight. Items whose key cannot be derived are kept.
    pub async fn filter_unseen<P: Serialize>(
        &self,
        namespace: Namespace,
        items: Vec<P>,
    ) -> Vec<P> {
        let mut unseen = Vec::with_capacity(items.len());

        for item in items {
            self.checked.fetch_add(1, Ordering::Relaxed);

            let key = match self.keys.generate(namespace, &item) {
                Ok(key) => key,
                Err(e) => {
                    // Fail open: an unkeyable item passes through untouched.
                    warn!(namespace = %namespace, error = %e, "keeping unkeyable batch item");
                    unseen.push(item);
                    continue;
                }
            };

            if self.is_in_flight(&key) {
                self.in_flight_skips.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if self.cache.contains_key(&key).await {
                self.already_cached.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            unseen.push(item);
        }

        unseen
    }

    /// [`filter_unseen`](Self::filter_unseen), additionally marking every
    /// surviving item as in flight. Call [`finish`](Self::finish) once the
    /// produced value is cached, or [`abandon`](Self::abandon) when
    /// production fails so the item becomes retryable immediately.
    pub async fn begin<P: Serialize>(&self, namespace: Namespace, items: Vec<P>) -> Vec<P> {
        let unseen = self.filter_unseen(namespace, items).await;

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.in_flight_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        for item in &unseen {
            if let Ok(key) = self.keys.generate(namespace, item) {
                self.in_flight.insert(key, deadline);
            }
        }

        debug!(namespace = %namespace, count = unseen.len(), "marked batch items in flight");
        unseen
    }

    /// Clear the in-flight mark after the produced value reached the cache.
    pub fn finish<P: Serialize>(&self, namespace: Namespace, item: &P) {
        self.clear_mark(namespace, item);
    }

    /// Clear the in-flight mark after a failed production so the item is
    /// immediately retryable.
    pub fn abandon<P: Serialize>(&self, namespace: Namespace, item: &P) {
        self.clear_mark(namespace, item);
    }

    /// Number of live in-flight marks.
    pub fn in_flight_len(&self) -> usize {
        let now = Utc::now();
        self.in_flight.iter().filter(|r| *r.value() > now).count()
    }

    /// Point-in-time dedup counters.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            checked: self.checked.load(Ordering::Relaxed),
            already_cached: self.already_cached.load(Ordering::Relaxed),
            in_flight_skips: self.in_flight_skips.load(Ordering::Relaxed),
        }
    }

    fn clear_mark<P: Serialize>(&self, namespace: Namespace, item: &P) {
        if let Ok(key) = self.keys.generate(namespace, item) {
            self.in_flight.remove(&key);
        }
    }

    fn is_in_flight(&self, key: &CacheKey) -> bool {
        let live = match self.in_flight.get(key) {
            Some(deadline) => *deadline > Utc::now(),
            None => return false,
        };
        if !live {
            self.in_flight.remove(key);
        }
        live
    }
}

/// Snapshot of dedup counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DedupStats {
    /// Items examined.
    pub checked: u64,
    /// Items dropped because a tier already held them.
    pub already_cached: u64,
    /// Items dropped because another batch is producing them.
    pub in_flight_skips: u64,
}

impl DedupStats {
    /// Fraction of examined items that were duplicates (0.0 when idle).
    pub fn duplication_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            (self.already_cached + self.in_flight_skips) as f64 / self.checked as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(raw: &[&str]) -> Vec<serde_json::Value> {
        raw.iter().map(|id| json!({ "video_id": id })).collect()
    }

    async fn cache_with(ids: &[&str]) -> Arc<CacheCoordinator> {
        let cache = Arc::new(CacheCoordinator::in_memory());
        for id in ids {
            cache
                .set(Namespace::Transcript, &json!({ "video_id": id }), &json!("t"))
                .await
                .unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_filter_drops_cached_items() {
        let cache = cache_with(&["id2", "id4"]).await;
        let filter = DeduplicationFilter::new(cache);

        let unseen = filter
            .filter_unseen(Namespace::Transcript, ids(&["id1", "id2", "id3", "id4", "id5"]))
            .await;

        assert_eq!(unseen, ids(&["id1", "id3", "id5"]));
    }

    #[tokio::test]
    async fn test_filter_is_namespace_scoped() {
        let cache = cache_with(&["id1"]).await;
        let filter = DeduplicationFilter::new(cache);

        // cached as a transcript, but never analyzed
        let unseen = filter
            .filter_unseen(Namespace::Analysis, ids(&["id1"]))
            .await;

        assert_eq!(unseen.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_shields_items_from_other_batches() {
        let cache = cache_with(&[]).await;
        let filter = DeduplicationFilter::new(cache);

        let first = filter.begin(Namespace::Transcript, ids(&["id1", "id2"])).await;
        assert_eq!(first.len(), 2);
        assert_eq!(filter.in_flight_len(), 2);

        // A second batch overlapping the first sees only the new item
        let second = filter
            .begin(Namespace::Transcript, ids(&["id1", "id2", "id3"]))
            .await;
        assert_eq!(second, ids(&["id3"]));
    }

    #[tokio::test]
    async fn test_finish_clears_the_mark() {
        let cache = cache_with(&[]).await;
        let filter = DeduplicationFilter::new(cache.clone());

        filter.begin(Namespace::Transcript, ids(&["id1"])).await;
        cache
            .set(Namespace::Transcript, &json!({ "video_id": "id1" }), &json!("t"))
            .await
            .unwrap();
        filter.finish(Namespace::Transcript, &json!({ "video_id": "id1" }));

        assert_eq!(filter.in_flight_len(), 0);
        // still filtered, but now because the cache holds it
        let unseen = filter.filter_unseen(Namespace::Transcript, ids(&["id1"])).await;
        assert!(unseen.is_empty());
        assert_eq!(filter.stats().already_cached, 1);
    }

    #[tokio::test]
    async fn test_abandon_makes_item_retryable() {
        let cache = cache_with(&[]).await;
        let filter = DeduplicationFilter::new(cache);

        filter.begin(Namespace::Transcript, ids(&["id1"])).await;
        filter.abandon(Namespace::Transcript, &json!({ "video_id": "id1" }));

        let retry = filter.filter_unseen(Namespace::Transcript, ids(&["id1"])).await;
        assert_eq!(retry.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_in_flight_marks_expire() {
        let cache = cache_with(&[]).await;
        let filter =
            DeduplicationFilter::with_in_flight_ttl(cache, Duration::from_millis(20));

        filter.begin(Namespace::Transcript, ids(&["id1"])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the mark aged out; the item is visible again
        let unseen = filter.filter_unseen(Namespace::Transcript, ids(&["id1"])).await;
        assert_eq!(unseen.len(), 1);
        assert_eq!(filter.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_rows_pass_the_filter() {
        let cache = Arc::new(CacheCoordinator::in_memory());
        cache
            .set_with_ttl(
                Namespace::Transcript,
                &json!({ "video_id": "id1" }),
                &json!("t"),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        let filter = DeduplicationFilter::new(cache);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let unseen = filter.filter_unseen(Namespace::Transcript, ids(&["id1"])).await;
        assert_eq!(unseen.len(), 1, "expired entries must not suppress work");
    }

    #[tokio::test]
    async fn test_duplication_rate() {
        let cache = cache_with(&["id1"]).await;
        let filter = DeduplicationFilter::new(cache);

        filter
            .filter_unseen(Namespace::Transcript, ids(&["id1", "id2"]))
            .await;

        let stats = filter.stats();
        assert_eq!(stats.checked, 2);
        assert!((stats.duplication_rate() - 0.5).abs() < f64::EPSILON);
    }
}
