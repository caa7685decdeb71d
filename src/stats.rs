//! Cache Statistics
//!
//! Purely additive in-process counters; no persistence, reset on restart.
//! Recording is lock-free (relaxed atomics); `snapshot` gives a consistent-
//! enough view for dashboards and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::store::Tier;

/// Lock-free hit/miss/write accounting for the engine.
#[derive(Debug, Default)]
pub struct StatsCollector {
    volatile_hits: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    total_requests: AtomicU64,

    volatile_writes: AtomicU64,
    local_writes: AtomicU64,
    remote_writes: AtomicU64,
    volatile_write_failures: AtomicU64,
    local_write_failures: AtomicU64,
    remote_write_failures: AtomicU64,

    promotions: AtomicU64,
    invalidations: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read hit at `tier` (counts one request).
    pub fn record_hit(&self, tier: Tier) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.hit_counter(tier).fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full miss across all tiers (counts one request).
    pub fn record_miss(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write attempt against `tier`.
    pub fn record_write_attempt(&self, tier: Tier) {
        self.write_counter(tier).fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed write against `tier`.
    pub fn record_write_failure(&self, tier: Tier) {
        self.failure_counter(tier).fetch_add(1, Ordering::Relaxed);
    }

    /// Record one promotion of a slow-tier hit into the faster tiers.
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one invalidation operation (key or namespace).
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits recorded at `tier` so far.
    pub fn hits(&self, tier: Tier) -> u64 {
        self.hit_counter(tier).load(Ordering::Relaxed)
    }

    /// Write attempts recorded against `tier` so far.
    pub fn writes_attempted(&self, tier: Tier) -> u64 {
        self.write_counter(tier).load(Ordering::Relaxed)
    }

    /// Point-in-time view of every counter.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            volatile_writes: self.volatile_writes.load(Ordering::Relaxed),
            local_writes: self.local_writes.load(Ordering::Relaxed),
            remote_writes: self.remote_writes.load(Ordering::Relaxed),
            volatile_write_failures: self.volatile_write_failures.load(Ordering::Relaxed),
            local_write_failures: self.local_write_failures.load(Ordering::Relaxed),
            remote_write_failures: self.remote_write_failures.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter (tests, explicit user reset).
    pub fn reset(&self) {
        for counter in [
            &self.volatile_hits,
            &self.local_hits,
            &self.remote_hits,
            &self.misses,
            &self.total_requests,
            &self.volatile_writes,
            &self.local_writes,
            &self.remote_writes,
            &self.volatile_write_failures,
            &self.local_write_failures,
            &self.remote_write_failures,
            &self.promotions,
            &self.invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn hit_counter(&self, tier: Tier) -> &AtomicU64 {
        match tier {
            Tier::Volatile => &self.volatile_hits,
            Tier::Local => &self.local_hits,
            Tier::Remote => &self.remote_hits,
        }
    }

    fn write_counter(&self, tier: Tier) -> &AtomicU64 {
        match tier {
            Tier::Volatile => &self.volatile_writes,
            Tier::Local => &self.local_writes,
            Tier::Remote => &self.remote_writes,
        }
    }

    fn failure_counter(&self, tier: Tier) -> &AtomicU64 {
        match tier {
            Tier::Volatile => &self.volatile_write_failures,
            Tier::Local => &self.local_write_failures,
            Tier::Remote => &self.remote_write_failures,
        }
    }
}

/// Snapshot of the engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub volatile_hits: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub volatile_writes: u64,
    pub local_writes: u64,
    pub remote_writes: u64,
    pub volatile_write_failures: u64,
    pub local_write_failures: u64,
    pub remote_write_failures: u64,
    pub promotions: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Hits summed across tiers.
    pub fn total_hits(&self) -> u64 {
        self.volatile_hits + self.local_hits + self.remote_hits
    }

    /// Fraction of requests served from cache (0.0 when idle).
    pub fn efficiency(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_hits() as f64 / self.total_requests as f64
        }
    }

    /// Hits recorded at one tier.
    pub fn hits(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Volatile => self.volatile_hits,
            Tier::Local => self.local_hits,
            Tier::Remote => self.remote_hits,
        }
    }

    /// Write attempts recorded against one tier.
    pub fn writes_attempted(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Volatile => self.volatile_writes,
            Tier::Local => self.local_writes,
            Tier::Remote => self.remote_writes,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses_count_requests() {
        let stats = StatsCollector::new();

        stats.record_hit(Tier::Volatile);
        stats.record_hit(Tier::Remote);
        stats.record_miss();

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.volatile_hits, 1);
        assert_eq!(snap.remote_hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.total_hits(), 2);
    }

    #[test]
    fn test_efficiency() {
        let stats = StatsCollector::new();
        assert_eq!(stats.snapshot().efficiency(), 0.0);

        stats.record_hit(Tier::Volatile);
        stats.record_hit(Tier::Local);
        stats.record_miss();
        stats.record_miss();

        let snap = stats.snapshot();
        assert!((snap.efficiency() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_write_accounting_per_tier() {
        let stats = StatsCollector::new();

        stats.record_write_attempt(Tier::Volatile);
        stats.record_write_attempt(Tier::Local);
        stats.record_write_failure(Tier::Local);

        let snap = stats.snapshot();
        assert_eq!(snap.writes_attempted(Tier::Volatile), 1);
        assert_eq!(snap.writes_attempted(Tier::Local), 1);
        assert_eq!(snap.writes_attempted(Tier::Remote), 0);
        assert_eq!(snap.local_write_failures, 1);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = StatsCollector::new();
        stats.record_hit(Tier::Volatile);
        stats.record_write_attempt(Tier::Remote);
        stats.record_promotion();

        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.total_hits(), 0);
        assert_eq!(snap.remote_writes, 0);
        assert_eq!(snap.promotions, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = StatsCollector::new();
        stats.record_hit(Tier::Local);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["local_hits"], 1);
    }
}
