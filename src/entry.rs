//! Cache Entry Model
//!
//! A cache entry carries a JSON payload plus the bookkeeping the eviction
//! policy needs: creation and expiry timestamps, access count, last-access
//! timestamp, and a serialized-size estimate.
//!
//! Entries cross the durable-tier boundary through an explicit codec:
//! [`CacheEntry::to_bytes`] on write, [`CacheEntry::from_bytes`] on read.
//! Decoding validates the entry invariants; a row that fails to decode or
//! validate is corrupt and is evicted by the tier that found it, never
//! surfaced to the caller.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::CacheError;
use crate::key::CacheKey;

/// One cached value with its bookkeeping metadata.
///
/// Invariants (checked by [`validate`](Self::validate)):
/// - `expires_at > cached_at`
/// - `last_accessed_at >= cached_at`
/// - `access_count >= 1`
///
/// The payload is never mutated in place; a new value for the same key
/// replaces the entry wholesale. Only `access_count` / `last_accessed_at`
/// change over an entry's lifetime, on read hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical key this entry is stored under
    pub key: CacheKey,
    /// Cached payload (JSON-serializable by contract)
    pub payload: Value,
    /// Creation timestamp
    pub cached_at: DateTime<Utc>,
    /// Staleness deadline; tiers re-stamp this with their own TTL
    pub expires_at: DateTime<Utc>,
    /// Read hits since creation, starts at 1
    pub access_count: u32,
    /// Timestamp of the most recent read hit
    pub last_accessed_at: DateTime<Utc>,
    /// Serialized payload size in bytes
    pub size_estimate: u64,
}

impl CacheEntry {
    /// Create a fresh entry expiring `ttl` from now.
    pub fn new(key: CacheKey, payload: Value, ttl: Duration) -> Self {
        let now = Utc::now();
        let size_estimate = serde_json::to_vec(&payload)
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        Self {
            key,
            payload,
            cached_at: now,
            expires_at: now + clamp_ttl(ttl),
            access_count: 1,
            last_accessed_at: now,
            size_estimate,
        }
    }

    /// Copy of this entry with `expires_at` re-stamped to `ttl` from now.
    ///
    /// Tiers apply their own TTL at write time, so the same value may be
    /// stale in a fast tier while still fresh in a slower one — and an old
    /// entry promoted out of a slow tier gets a full fresh lease in the
    /// faster tiers it is copied into.
    pub fn restamped(&self, ttl: Duration) -> Self {
        let mut entry = self.clone();
        entry.expires_at = Utc::now() + clamp_ttl(ttl);
        entry
    }

    /// Record a read hit.
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Utc::now();
    }

    /// True once the staleness deadline has passed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock (sweeps pass one `now`).
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check the entry invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.expires_at <= self.cached_at {
            return Err(format!(
                "expires_at {} is not after cached_at {}",
                self.expires_at, self.cached_at
            ));
        }
        if self.last_accessed_at < self.cached_at {
            return Err(format!(
                "last_accessed_at {} precedes cached_at {}",
                self.last_accessed_at, self.cached_at
            ));
        }
        if self.access_count == 0 {
            return Err("access_count is zero".to_string());
        }
        Ok(())
    }

    /// Encode for a durable backend (compact JSON).
    pub fn to_bytes(&self) -> Result<Bytes, CacheError> {
        let raw = serde_json::to_vec(self).map_err(|e| CacheError::Deserialization {
            key: self.key.as_str().to_string(),
            reason: format!("encode failed: {e}"),
        })?;
        Ok(Bytes::from(raw))
    }

    /// Decode a stored row and check its invariants.
    ///
    /// `key` is the key the row was loaded under; a decoded entry whose own
    /// key disagrees is corrupt.
    pub fn from_bytes(key: &CacheKey, raw: &[u8]) -> Result<Self, CacheError> {
        let entry = Self::from_stored(raw).map_err(|e| match e {
            CacheError::Deserialization { reason, .. } => CacheError::Deserialization {
                key: key.as_str().to_string(),
                reason,
            },
            other => other,
        })?;

        if entry.key != *key {
            return Err(CacheError::Deserialization {
                key: key.as_str().to_string(),
                reason: format!("stored row belongs to {}", entry.key),
            });
        }

        Ok(entry)
    }

    /// Decode a stored row when the expected key is not known (sweeps walk
    /// raw backend rows). Invariants are still checked.
    pub fn from_stored(raw: &[u8]) -> Result<Self, CacheError> {
        let entry: CacheEntry =
            serde_json::from_slice(raw).map_err(|e| CacheError::Deserialization {
                key: "<undecodable>".to_string(),
                reason: e.to_string(),
            })?;

        entry.validate().map_err(|reason| CacheError::Deserialization {
            key: entry.key.as_str().to_string(),
            reason,
        })?;

        Ok(entry)
    }
}

/// Convert a std TTL to a chrono duration, clamping out-of-range values.
fn clamp_ttl(ttl: Duration) -> ChronoDuration {
    ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(3650))
}

// =============================================================================
// Tests
// =============================================================================
