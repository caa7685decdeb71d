//! Error types for the cache engine

use thiserror::Error;

use crate::store::Tier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache engine.
///
/// Only `InvalidKeyInput` ever reaches a caller of the public API: tier-local
/// failures are swallowed and logged, a fully failed `get` is reported as a
/// miss, and a fully failed `set` is reported as a persistence warning while
/// the caller keeps the freshly produced value.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Request parameters could not be canonicalized into a cache key.
    /// Nothing is cached on this path.
    #[error("invalid key input for namespace {namespace}: {reason}")]
    InvalidKeyInput { namespace: String, reason: String },

    /// A stored entry failed to decode or violated an entry invariant.
    /// Treated as a miss at that tier; the corrupt row is evicted.
    #[error("failed to decode cached entry {key}: {reason}")]
    Deserialization { key: String, reason: String },

    /// A storage tier could not serve the operation (backend down, quota
    /// exhausted, missing identity). The tier is skipped; the operation
    /// continues with the remaining tiers.
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: Tier, reason: String },

    /// I/O error from a device-local backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Shorthand for a tier-unavailable error.
    pub fn unavailable(tier: Tier, reason: impl Into<String>) -> Self {
        Self::TierUnavailable {
            tier,
            reason: reason.into(),
        }
    }

    /// True if this error is local to one tier and must never surface to a
    /// caller of the coordinator.
    pub fn is_tier_local(&self) -> bool {
        matches!(
            self,
            Self::Deserialization { .. } | Self::TierUnavailable { .. } | Self::Io(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_key_input_display() {
        let err = CacheError::InvalidKeyInput {
            namespace: "search".to_string(),
            reason: "map key is not a string".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("search"));
        assert!(text.contains("map key is not a string"));
    }

    #[test]
    fn test_tier_local_classification() {
        let unavailable = CacheError::unavailable(Tier::Remote, "no identity");
        assert!(unavailable.is_tier_local());

        let invalid = CacheError::InvalidKeyInput {
            namespace: "search".to_string(),
            reason: "nan".to_string(),
        };
        assert!(!invalid.is_tier_local());
    }
}
