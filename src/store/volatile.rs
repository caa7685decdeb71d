//! Volatile Store - In-Process Hot Tier
//!
//! Bounded in-memory map, fastest tier, gone on process exit. Synchronous
//! internally but exposed through the async [`TierStore`] contract for
//! uniformity with the durable tiers.
//!
//! Capacity is enforced at insert: expired rows are dropped first, then the
//! least-recently-accessed entry is evicted if the tier is still full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::TierConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::{CacheKey, Namespace};
use crate::policy::EvictionPolicy;
use crate::store::{Tier, TierStore};

/// In-process bounded tier.
pub struct VolatileStore {
    entries: DashMap<CacheKey, CacheEntry>,
    config: TierConfig,
    policy: EvictionPolicy,
    /// Serializes the capacity-check-then-insert sequence so concurrent
    /// writers cannot overshoot the bound.
    insert_lock: Mutex<()>,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl VolatileStore {
    /// Create with default settings (50 entries, 30 minute TTL).
    pub fn new() -> Self {
        Self::with_config(TierConfig::volatile_defaults())
    }

    /// Create with custom settings.
    pub fn with_config(config: TierConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            policy: EvictionPolicy::new(),
            insert_lock: Mutex::new(()),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity evictions performed so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// TTL expirations removed so far.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Drop expired rows, then evict LRU victims until one slot is free.
    /// Caller holds `insert_lock`.
    fn make_room(&self, capacity: usize) {
        let now = Utc::now();
        let snapshot: Vec<CacheEntry> = self.entries.iter().map(|r| r.value().clone()).collect();

        for key in self.policy.expired_keys(snapshot.iter(), now) {
            if self.entries.remove(&key).is_some() {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }

        while self.entries.len() >= capacity {
            let snapshot: Vec<CacheEntry> =
                self.entries.iter().map(|r| r.value().clone()).collect();
            let Some(victim) = self.policy.select_victim(snapshot.iter()) else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, "evicted LRU entry from volatile tier");
            }
        }
    }
}

impl Default for VolatileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierStore for VolatileStore {
    fn tier(&self) -> Tier {
        Tier::Volatile
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        if !self.config.enabled {
            return Ok(None);
        }

        match self.entries.get_mut(key) {
            Some(mut slot) => {
                if !slot.is_expired() {
                    slot.touch();
                    return Ok(Some(slot.clone()));
                }
            }
            None => return Ok(None),
        }

        // Lazy expiry: a read of a stale row removes it and reports a miss.
        if self.entries.remove(key).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }

    async fn set(&self, entry: CacheEntry, ttl: Option<Duration>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let entry = entry.restamped(ttl.unwrap_or(self.config.default_ttl));

        let _guard = self.insert_lock.lock();
        if let Some(capacity) = self.config.max_entries {
            if !self.entries.contains_key(&entry.key) && self.entries.len() >= capacity {
                self.make_room(capacity);
            }
        }
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn has(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        let expired = match self.entries.get(key) {
            Some(slot) => slot.is_expired(),
            None => return Ok(false),
        };
        if !expired {
            return Ok(true);
        }
        if self.entries.remove(key).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false)
    }

    async fn remove_namespace(&self, namespace: Namespace) -> Result<u64> {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|r| r.key().in_namespace(namespace))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn sweep(&self) -> Result<u64> {
        let now = Utc::now();
        let snapshot: Vec<CacheEntry> = self.entries.iter().map(|r| r.value().clone()).collect();

        let mut removed = 0;
        for key in self.policy.expired_keys(snapshot.iter(), now) {
            if self.entries.remove(&key).is_some() {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
