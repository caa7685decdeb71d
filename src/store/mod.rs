//! Storage Tiers
//!
//! Three implementations of one contract, ordered by latency:
//!
//! - [`VolatileStore`] — in-process, bounded, fastest; gone on restart
//! - [`LocalStore`] — durable per-device, larger, slower
//! - [`RemoteStore`] — durable per-user, shared across devices, slowest
//!
//! Every tier enforces its own TTL independently: an entry stale in a fast
//! tier may still be fresh in a slower one written with a longer TTL. Tiers
//! are deliberately not required to be mutually consistent.

mod local;
mod remote;
mod volatile;

pub use local::{FsBackend, LocalBackend, LocalStore, MemoryBackend};
pub use remote::{
    IdentityProvider, MemoryRemoteBackend, RemoteBackend, RemoteStore, StaticIdentity, UserId,
};
pub use volatile::VolatileStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::{CacheKey, Namespace};

/// One storage tier in the Volatile/Local/Remote hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process memory (hot)
    Volatile,
    /// Durable device-local storage (warm)
    Local,
    /// Durable per-user remote storage (cold)
    Remote,
}

impl Tier {
    /// All tiers in increasing latency order — the probe order.
    pub fn probe_order() -> [Tier; 3] {
        [Tier::Volatile, Tier::Local, Tier::Remote]
    }

    /// Tiers strictly faster than this one (promotion targets).
    pub fn faster(&self) -> &'static [Tier] {
        match self {
            Tier::Volatile => &[],
            Tier::Local => &[Tier::Volatile],
            Tier::Remote => &[Tier::Volatile, Tier::Local],
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Volatile => write!(f, "volatile"),
            Tier::Local => write!(f, "local"),
            Tier::Remote => write!(f, "remote"),
        }
    }
}

/// Common contract for every storage tier.
///
/// All operations are async for uniformity even where the implementation is
/// synchronous in practice (the Volatile tier). Error discipline: an
/// implementation returns `Err` only for tier-level unavailability; a
/// corrupt row is evicted internally and reported as a miss.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Which tier this store implements.
    fn tier(&self) -> Tier;

    /// Whether the tier currently participates in reads and writes.
    /// A disabled tier yields no hits and accepts no writes, without error.
    fn is_enabled(&self) -> bool;

    /// Look up an entry. Expired rows are removed and reported as `None`.
    /// A hit records the access (count + last-access timestamp).
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Write an entry, re-stamping its expiry with `ttl` when given or the
    /// tier's default TTL otherwise. Replaces any existing row wholesale.
    async fn set(&self, entry: CacheEntry, ttl: Option<Duration>) -> Result<()>;

    /// Remove an entry. Returns whether a row existed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// TTL-aware existence check that does not record an access.
    async fn has(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every entry in a namespace. Returns how many were removed.
    async fn remove_namespace(&self, namespace: Namespace) -> Result<u64>;

    /// Eagerly remove expired entries. Returns how many were removed.
    async fn sweep(&self) -> Result<u64>;

    /// Remove everything in this tier.
    async fn clear(&self) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_order_is_latency_order() {
        assert_eq!(
            Tier::probe_order(),
            [Tier::Volatile, Tier::Local, Tier::Remote]
        );
    }

    #[test]
    fn test_faster_tiers() {
        assert!(Tier::Volatile.faster().is_empty());
        assert_eq!(Tier::Local.faster(), &[Tier::Volatile]);
        assert_eq!(Tier::Remote.faster(), &[Tier::Volatile, Tier::Local]);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Volatile.to_string(), "volatile");
        assert_eq!(Tier::Local.to_string(), "local");
        assert_eq!(Tier::Remote.to_string(), "remote");
    }
}
