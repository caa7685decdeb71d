//! Cache Coordinator
//!
//! Orchestrates read-through probing, tier promotion, parallel write-through,
//! invalidation, and flush scheduling across the three storage tiers.
//!
//! The coordinator never calls a producer: on a full miss it returns
//! [`Lookup::Miss`] and the caller decides how to produce the value (see
//! [`crate::producer::fetch_through`] for the standard glue). Cache policy
//! and value production stay separate.
//!
//! Ownership is explicit: construct one coordinator via [`builder`] and hand
//! it to callers behind an [`Arc`]. There is no module-level singleton.
//!
//! [`builder`]: CacheCoordinator::builder

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, KeyGenerator, Namespace};
use crate::stats::{CacheStats, StatsCollector};
use crate::store::{
    IdentityProvider, LocalBackend, LocalStore, MemoryBackend, MemoryRemoteBackend, RemoteBackend,
    RemoteStore, StaticIdentity, Tier, TierStore, VolatileStore,
};

/// Result of a cache lookup: a value and the tier that served it, or a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// Served from cache.
    Hit {
        value: T,
        /// Tier the value was found in (it has since been promoted into all
        /// faster tiers).
        source: Tier,
    },
    /// No tier had a fresh entry; the caller should produce the value.
    Miss,
}

impl<T> Lookup<T> {
    /// True for a cache hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    /// Tier that served the hit, `None` on miss.
    pub fn source(&self) -> Option<Tier> {
        match self {
            Lookup::Hit { source, .. } => Some(*source),
            Lookup::Miss => None,
        }
    }

    /// Consume into the value, `None` on miss.
    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Hit { value, .. } => Some(value),
            Lookup::Miss => None,
        }
    }
}

/// Per-tier outcome of a write-through.
///
/// A `set` never fails because of tier trouble; the report says which tiers
/// took the write, which failed, and which had it deferred into the remote
/// flush buffer.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Tiers that accepted the write.
    pub written: Vec<Tier>,
    /// Tiers that were attempted and failed (already logged).
    pub failed: Vec<Tier>,
    /// Tiers whose write is buffered awaiting the next flush.
    pub deferred: Vec<Tier>,
}

impl WriteReport {
    /// True when every attempted tier failed and nothing was deferred —
    /// the persistence-warning condition.
    pub fn all_failed(&self) -> bool {
        self.written.is_empty() && self.deferred.is_empty() && !self.failed.is_empty()
    }
}

/// Builder for an explicitly owned [`CacheCoordinator`].
pub struct CoordinatorBuilder {
    config: CacheConfig,
    local_backend: Arc<dyn LocalBackend>,
    remote_backend: Arc<dyn RemoteBackend>,
    identity: Arc<dyn IdentityProvider>,
}

impl CoordinatorBuilder {
    fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            local_backend: Arc::new(MemoryBackend::new()),
            remote_backend: Arc::new(MemoryRemoteBackend::new()),
            identity: Arc::new(StaticIdentity::anonymous()),
        }
    }

    /// Use a custom configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Device-local persistent backend for the Local tier.
    pub fn local_backend(mut self, backend: Arc<dyn LocalBackend>) -> Self {
        self.local_backend = backend;
        self
    }

    /// Per-user durable backend for the Remote tier.
    pub fn remote_backend(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.remote_backend = backend;
        self
    }

    /// Identity context gating the Remote tier.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn build(self) -> CacheCoordinator {
        CacheCoordinator {
            keys: KeyGenerator::new(),
            volatile: Arc::new(VolatileStore::with_config(self.config.volatile.clone())),
            local: Arc::new(LocalStore::with_config(
                self.config.local.clone(),
                self.local_backend,
            )),
            remote: Arc::new(RemoteStore::with_config(
                self.config.remote.clone(),
                self.remote_backend,
                self.identity,
            )),
            stats: Arc::new(StatsCollector::new()),
            pending_remote: DashMap::new(),
            last_flush: Mutex::new(None),
            config: self.config,
        }
    }
}

/// Multi-tier cache front door.
pub struct CacheCoordinator {
    keys: KeyGenerator,
    volatile: Arc<VolatileStore>,
    local: Arc<LocalStore>,
    remote: Arc<RemoteStore>,
    stats: Arc<StatsCollector>,
    /// Remote writes awaiting the next flush window (key → entry + ttl
    /// override). Later writes for the same key coalesce, last one wins.
    pending_remote: DashMap<CacheKey, (CacheEntry, Option<Duration>)>,
    last_flush: Mutex<Option<Instant>>,
    config: CacheConfig,
}

impl CacheCoordinator {
    /// Start building a coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Fully in-memory engine with default config (tests, fixtures).
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// Look up a typed value by its semantic request.
    ///
    /// Probes Volatile → Local → Remote. A hit found in a slower tier is
    /// promoted into every faster tier before this returns. Tier failures
    /// are swallowed and logged; if every tier misses or fails this is a
    /// [`Lookup::Miss`], never an error. The only error is
    /// [`CacheError::InvalidKeyInput`].
    #[instrument(skip(self, params), fields(namespace = %namespace))]
    pub async fn get<T, P>(&self, namespace: Namespace, params: &P) -> Result<Lookup<T>>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let key = self.keys.generate(namespace, params)?;

        for store in self.tier_stores() {
            if !store.is_enabled() {
                continue;
            }
            let tier = store.tier();

            let entry = match store.get(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = %tier, key = %key, error = %e, "tier failed during get");
                    continue;
                }
            };

            let value: T = match serde_json::from_value(entry.payload.clone()) {
                Ok(value) => value,
                Err(e) => {
                    // Typed-boundary decode failure: the row is corrupt for
                    // this caller; evict it here and keep probing deeper.
                    warn!(tier = %tier, key = %key, error = %e, "evicting undecodable payload");
                    let _ = store.delete(&key).await;
                    continue;
                }
            };

            self.stats.record_hit(tier);
            self.promote(&entry, tier).await;
            return Ok(Lookup::Hit {
                value,
                source: tier,
            });
        }

        self.stats.record_miss();
        Ok(Lookup::Miss)
    }

    /// Write a freshly produced value through every enabled tier, stamping
    /// each tier's default TTL.
    pub async fn set<P, T>(
        &self,
        namespace: Namespace,
        params: &P,
        value: &T,
    ) -> Result<WriteReport>
    where
        P: Serialize,
        T: Serialize,
    {
        self.write_through(namespace, params, value, None).await
    }

    /// Write with an explicit TTL overriding every tier's default.
    pub async fn set_with_ttl<P, T>(
        &self,
        namespace: Namespace,
        params: &P,
        value: &T,
        ttl: Duration,
    ) -> Result<WriteReport>
    where
        P: Serialize,
        T: Serialize,
    {
        self.write_through(namespace, params, value, Some(ttl)).await
    }

    #[instrument(skip(self, params, value), fields(namespace = %namespace))]
    async fn write_through<P, T>(
        &self,
        namespace: Namespace,
        params: &P,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<WriteReport>
    where
        P: Serialize,
        T: Serialize,
    {
        let key = self.keys.generate(namespace, params)?;
        let payload =
            serde_json::to_value(value).map_err(|e| CacheError::InvalidKeyInput {
                namespace: namespace.to_string(),
                reason: format!("payload is not JSON-serializable: {e}"),
            })?;

        let base_ttl = ttl.unwrap_or(self.config.volatile.default_ttl);
        let entry = CacheEntry::new(key.clone(), payload, base_ttl);

        let mut report = WriteReport::default();

        // Fast and warm tiers: fire in parallel as detached tasks, then
        // await the handles. Abandoning this future leaves the writes
        // running; they still populate the cache.
        let mut handles = Vec::new();
        for store in [
            Arc::clone(&self.volatile) as Arc<dyn TierStore>,
            Arc::clone(&self.local) as Arc<dyn TierStore>,
        ] {
            if !store.is_enabled() {
                continue;
            }
            let tier = store.tier();
            self.stats.record_write_attempt(tier);
            let task_entry = entry.clone();
            handles.push((
                tier,
                tokio::spawn(async move { store.set(task_entry, ttl).await }),
            ));
        }

        // Slowest tier: route through the flush scheduler.
        if self.remote.is_enabled() {
            if self.config.remote_flush_interval.is_zero() {
                let store = Arc::clone(&self.remote) as Arc<dyn TierStore>;
                self.stats.record_write_attempt(Tier::Remote);
                let task_entry = entry.clone();
                handles.push((
                    Tier::Remote,
                    tokio::spawn(async move { store.set(task_entry, ttl).await }),
                ));
            } else {
                self.pending_remote.insert(key.clone(), (entry, ttl));
                report.deferred.push(Tier::Remote);
                self.maybe_schedule_flush();
            }
        }

        let outcomes = futures::future::join_all(
            handles
                .into_iter()
                .map(|(tier, handle)| async move { (tier, handle.await) }),
        )
        .await;

        for (tier, outcome) in outcomes {
            match outcome {
                Ok(Ok(())) => report.written.push(tier),
                Ok(Err(e)) => {
                    warn!(tier = %tier, key = %key, error = %e, "tier failed during set");
                    self.stats.record_write_failure(tier);
                    report.failed.push(tier);
                }
                Err(e) => {
                    warn!(tier = %tier, key = %key, error = %e, "tier write task panicked");
                    self.stats.record_write_failure(tier);
                    report.failed.push(tier);
                }
            }
        }

        if report.all_failed() {
            // Non-fatal persistence warning: the caller keeps its value,
            // the cache just failed to remember it.
            warn!(key = %key, "cache persistence warning: no tier accepted the write");
        }

        Ok(report)
    }

    /// Remove the entry for one semantic request from every tier.
    pub async fn invalidate_key<P: Serialize>(
        &self,
        namespace: Namespace,
        params: &P,
    ) -> Result<bool> {
        let key = self.keys.generate(namespace, params)?;
        Ok(self.invalidate(&key).await)
    }

    /// Remove one key from every tier. Returns whether any tier had it.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.pending_remote.remove(key);
        self.stats.record_invalidation();

        let mut existed = false;
        for store in self.tier_stores() {
            match store.delete(key).await {
                Ok(removed) => existed |= removed,
                Err(e) => {
                    warn!(tier = %store.tier(), key = %key, error = %e, "tier failed during invalidate")
                }
            }
        }
        existed
    }

    /// Remove every entry in a namespace from every tier ("all search
    /// results", "all analyses"). Returns how many entries were removed.
    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn invalidate_namespace(&self, namespace: Namespace) -> u64 {
        self.pending_remote
            .retain(|key, _| !key.in_namespace(namespace));
        self.stats.record_invalidation();

        let mut removed = 0;
        for store in self.tier_stores() {
            match store.remove_namespace(namespace).await {
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(tier = %store.tier(), error = %e, "tier failed during namespace invalidation")
                }
            }
        }
        removed
    }

    /// TTL-aware existence probe across all tiers without decoding the
    /// value for the caller. Tier failures read as "not cached".
    pub async fn contains<P: Serialize>(&self, namespace: Namespace, params: &P) -> Result<bool> {
        let key = self.keys.generate(namespace, params)?;
        Ok(self.contains_key(&key).await)
    }

    /// [`contains`](Self::contains) for an already-derived key.
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        if self.pending_remote.contains_key(key) {
            return true;
        }
        for store in self.tier_stores() {
            if !store.is_enabled() {
                continue;
            }
            match store.has(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(tier = %store.tier(), key = %key, error = %e, "tier failed during contains")
                }
            }
        }
        false
    }

    /// Drain the remote flush buffer now, regardless of the flush window.
    pub async fn flush(&self) {
        let pending = self.drain_pending();
        if pending.is_empty() {
            return;
        }

        debug!(count = pending.len(), "flushing buffered remote writes");
        Self::write_pending(&self.remote, &self.stats, pending).await;
        *self.last_flush.lock() = Some(Instant::now());
    }

    /// Schedule a background flush if the minimum interval has elapsed.
    fn maybe_schedule_flush(&self) {
        let due = {
            let mut last = self.last_flush.lock();
            match *last {
                Some(at) if at.elapsed() < self.config.remote_flush_interval => false,
                _ => {
                    *last = Some(Instant::now());
                    true
                }
            }
        };
        if !due {
            return;
        }

        let pending = self.drain_pending();
        if pending.is_empty() {
            return;
        }

        let remote = Arc::clone(&self.remote);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            Self::write_pending(&remote, &stats, pending).await;
        });
    }

    /// Take everything out of the flush buffer.
    fn drain_pending(&self) -> Vec<(CacheKey, (CacheEntry, Option<Duration>))> {
        let keys: Vec<CacheKey> = self.pending_remote.iter().map(|r| r.key().clone()).collect();
        keys.into_iter()
            .filter_map(|k| self.pending_remote.remove(&k))
            .collect()
    }

    async fn write_pending(
        remote: &RemoteStore,
        stats: &StatsCollector,
        pending: Vec<(CacheKey, (CacheEntry, Option<Duration>))>,
    ) {
        for (key, (entry, ttl)) in pending {
            stats.record_write_attempt(Tier::Remote);
            if let Err(e) = remote.set(entry, ttl).await {
                warn!(key = %key, error = %e, "remote flush write failed");
                stats.record_write_failure(Tier::Remote);
            }
        }
    }

    /// Eagerly remove expired entries from every enabled tier.
    pub async fn sweep(&self) -> u64 {
        let mut removed = 0;
        for store in self.tier_stores() {
            if !store.is_enabled() {
                continue;
            }
            match store.sweep().await {
                Ok(count) => removed += count,
                Err(e) => warn!(tier = %store.tier(), error = %e, "tier sweep failed"),
            }
        }
        removed
    }

    /// Spawn the periodic eager-expiry sweeper. Abort the returned handle
    /// to stop it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval = coordinator.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let removed = coordinator.sweep().await;
                if removed > 0 {
                    debug!(removed, "sweeper removed expired entries");
                }
            }
        })
    }

    /// Remove everything from every tier and the flush buffer.
    pub async fn clear(&self) {
        self.pending_remote.clear();
        for store in self.tier_stores() {
            if let Err(e) = store.clear().await {
                warn!(tier = %store.tier(), error = %e, "tier clear failed");
            }
        }
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Volatile tier (tests, diagnostics).
    pub fn volatile(&self) -> &VolatileStore {
        &self.volatile
    }

    /// Local tier (tests, diagnostics).
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Remote tier (tests, diagnostics).
    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    /// Copy a hit found at `source` into every faster tier.
    async fn promote(&self, entry: &CacheEntry, source: Tier) {
        let targets = source.faster();
        if targets.is_empty() {
            return;
        }

        for tier in targets {
            let store: Arc<dyn TierStore> = match tier {
                Tier::Volatile => Arc::clone(&self.volatile) as Arc<dyn TierStore>,
                Tier::Local => Arc::clone(&self.local) as Arc<dyn TierStore>,
                Tier::Remote => continue,
            };
            if !store.is_enabled() {
                continue;
            }
            if let Err(e) = store.set(entry.clone(), None).await {
                warn!(tier = %tier, key = %entry.key, error = %e, "promotion write failed");
            }
        }
        self.stats.record_promotion();
        debug!(key = %entry.key, from = %source, "promoted entry into faster tiers");
    }

    fn tier_stores(&self) -> [Arc<dyn TierStore>; 3] {
        [
            Arc::clone(&self.volatile) as Arc<dyn TierStore>,
            Arc::clone(&self.local) as Arc<dyn TierStore>,
            Arc::clone(&self.remote) as Arc<dyn TierStore>,
        ]
    }
}

// =============================================================================
// Tests
// =============================================================================
