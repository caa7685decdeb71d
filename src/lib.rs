//! curio-cache - Multi-Tier Caching & Deduplication Engine
//!
//! Caching layer for media-curation pipelines that sit on top of expensive,
//! quota-limited producers (search APIs, transcript extractors, AI analysis
//! services). Avoids redundant producer calls, survives process restarts,
//! degrades gracefully when any storage tier is unavailable, and bounds its
//! own footprint.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                        Cache Coordinator                              │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  Volatile (RAM)      │ Local (device)       │ Remote (per-user)       │
//! │  ┌────────────────┐  │ ┌────────────────┐   │ ┌────────────────────┐  │
//! │  │ Bounded map    │  │ │ LocalBackend   │   │ │ RemoteBackend      │  │
//! │  │ ~50 entries    │  │ │ (fs / memory)  │   │ │ (identity-gated)   │  │
//! │  │ TTL 30 min     │  │ │ ~500, TTL 24h  │   │ │ TTL 7 days         │  │
//! │  └────────────────┘  │ └────────────────┘   │ └────────────────────┘  │
//! │         │            │        │             │          │              │
//! │         └────────────┴────────┴─────────────┴──────────┘              │
//! │                              │                                        │
//! │              read-through probe + promotion (LRU + TTL)               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads probe Volatile → Local → Remote and promote hits into every faster
//! tier; writes go through all enabled tiers in parallel. On a full miss the
//! coordinator returns [`Lookup::Miss`] — producing the value is the
//! caller's job (see [`producer::fetch_through`]), so cache policy and value
//! production stay separate.
//!
//! # Modules
//!
//! - [`config`] - Per-tier capacity/TTL settings
//! - [`coordinator`] - Read-through, promotion, write-through, invalidation
//! - [`dedup`] - Batch deduplication against cache + in-flight work
//! - [`entry`] - Cache entry model and the durable-tier codec
//! - [`error`] - Error taxonomy
//! - [`key`] - Canonical key generation
//! - [`policy`] - LRU + TTL eviction policy
//! - [`producer`] - Producer contract and read-through glue
//! - [`stats`] - Hit/miss/write counters
//! - [`store`] - The three tier implementations
//!
//! # Example
//!
//! ```
//! use curio_cache::{CacheCoordinator, Lookup, Namespace};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let cache = CacheCoordinator::in_memory();
//! let params = json!({ "video_id": "dQw4w9WgXcQ" });
//!
//! cache.set(Namespace::Transcript, &params, &json!({ "text": "..." }))
//!     .await
//!     .unwrap();
//!
//! let hit: Lookup<serde_json::Value> =
//!     cache.get(Namespace::Transcript, &params).await.unwrap();
//! assert!(hit.is_hit());
//! # });
//! ```

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod key;
pub mod policy;
pub mod producer;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use config::{CacheConfig, TierConfig};
pub use coordinator::{CacheCoordinator, CoordinatorBuilder, Lookup, WriteReport};
pub use dedup::DeduplicationFilter;
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use key::{CacheKey, KeyGenerator, Namespace};
pub use producer::{fetch_through, Producer, ProducerError, ValueSource};
pub use stats::CacheStats;
pub use store::{
    FsBackend, IdentityProvider, LocalBackend, RemoteBackend, StaticIdentity, Tier, TierStore,
    UserId,
};

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::config::{
        DEFAULT_LOCAL_CAPACITY, DEFAULT_LOCAL_TTL, DEFAULT_REMOTE_TTL, DEFAULT_VOLATILE_CAPACITY,
        DEFAULT_VOLATILE_TTL,
    };

    #[test]
    fn test_default_capacities() {
        assert_eq!(DEFAULT_VOLATILE_CAPACITY, 50);
        assert_eq!(DEFAULT_LOCAL_CAPACITY, 500);
    }

    #[test]
    fn test_ttls_grow_with_tier_latency() {
        assert!(DEFAULT_VOLATILE_TTL < DEFAULT_LOCAL_TTL);
        assert!(DEFAULT_LOCAL_TTL < DEFAULT_REMOTE_TTL);
    }
}
