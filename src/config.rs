//! Engine Configuration
//!
//! Per-tier capacity/TTL settings plus coordinator-level scheduling knobs.

use std::time::Duration;

use serde::Deserialize;

/// Default Volatile tier capacity (entries)
pub const DEFAULT_VOLATILE_CAPACITY: usize = 50;

/// Default Local tier capacity (entries)
pub const DEFAULT_LOCAL_CAPACITY: usize = 500;

/// Default Volatile tier TTL (30 minutes)
pub const DEFAULT_VOLATILE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default Local tier TTL (24 hours)
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default Remote tier TTL (7 days)
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for a single storage tier.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    /// Whether this tier participates in reads and writes
    pub enabled: bool,
    /// Entry-count bound; `None` means unbounded (Remote is unbounded,
    /// Volatile must be bounded)
    pub max_entries: Option<usize>,
    /// TTL stamped on entries written to this tier when the caller gives
    /// no override
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
}

impl TierConfig {
    /// Default Volatile tier settings: 50 entries, 30 minutes.
    pub fn volatile_defaults() -> Self {
        Self {
            enabled: true,
            max_entries: Some(DEFAULT_VOLATILE_CAPACITY),
            default_ttl: DEFAULT_VOLATILE_TTL,
        }
    }

    /// Default Local tier settings: 500 entries, 24 hours.
    pub fn local_defaults() -> Self {
        Self {
            enabled: true,
            max_entries: Some(DEFAULT_LOCAL_CAPACITY),
            default_ttl: DEFAULT_LOCAL_TTL,
        }
    }

    /// Default Remote tier settings: unbounded, 7 days.
    pub fn remote_defaults() -> Self {
        Self {
            enabled: true,
            max_entries: None,
            default_ttl: DEFAULT_REMOTE_TTL,
        }
    }

    /// Disabled tier of any kind.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_entries: None,
            default_ttl: Duration::from_secs(0),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Volatile (in-process) tier
    pub volatile: TierConfig,
    /// Local (durable per-device) tier
    pub local: TierConfig,
    /// Remote (durable per-user) tier
    pub remote: TierConfig,
    /// Minimum interval between flushes of buffered Remote writes.
    /// Zero means pure write-through (every `set` reaches Remote directly).
    #[serde(with = "duration_secs")]
    pub remote_flush_interval: Duration,
    /// Cadence for the optional eager-expiry sweeper task
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            volatile: TierConfig::volatile_defaults(),
            local: TierConfig::local_defaults(),
            remote: TierConfig::remote_defaults(),
            remote_flush_interval: Duration::from_secs(0),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Serde adapter: durations as whole seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_ladder() {
        let config = CacheConfig::default();

        assert_eq!(config.volatile.max_entries, Some(50));
        assert_eq!(config.local.max_entries, Some(500));
        assert_eq!(config.remote.max_entries, None);

        // TTLs grow with tier latency
        assert!(config.volatile.default_ttl < config.local.default_ttl);
        assert!(config.local.default_ttl < config.remote.default_ttl);
    }

    #[test]
    fn test_default_is_pure_write_through() {
        let config = CacheConfig::default();
        assert_eq!(config.remote_flush_interval, Duration::from_secs(0));
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "volatile": {"enabled": true, "max_entries": 10, "default_ttl": 60},
                "remote": {"enabled": false, "max_entries": null, "default_ttl": 0},
                "remote_flush_interval": 30
            }"#,
        )
        .unwrap();

        assert_eq!(config.volatile.max_entries, Some(10));
        assert_eq!(config.volatile.default_ttl, Duration::from_secs(60));
        assert!(!config.remote.enabled);
        // omitted sections fall back to defaults
        assert_eq!(config.local.max_entries, Some(500));
        assert_eq!(config.remote_flush_interval, Duration::from_secs(30));
    }
}
