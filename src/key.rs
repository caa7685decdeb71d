//! Cache Key Generation
//!
//! Deterministic, canonical keys derived from a request's semantic
//! parameters. Two semantically identical requests always produce the same
//! key regardless of how the caller ordered its fields.
//!
//! # Canonical form
//!
//! Parameters are serialized to JSON and normalized before hashing:
//!
//! - object keys sorted lexicographically
//! - `null` members dropped (an absent field and a null field are the same
//!   request)
//! - string values lowercased
//! - arrays kept in order (element order is semantic)
//!
//! The canonical text is digested with two independently seeded 64-bit
//! hashes, giving a 128-bit key body. Namespace and key-format version live
//! outside the digest, so keys from different namespaces can never collide
//! and a format bump implicitly invalidates old rows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

/// Current key format version. Bump when canonicalization rules change.
pub const KEY_VERSION: u32 = 1;

/// Resource namespace a cached value belongs to.
///
/// One namespace per producer: search results, transcripts, and AI relevance
/// analyses are cached and invalidated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Video search results keyed by normalized query + filter set
    Search,
    /// Extracted video transcripts keyed by video id
    Transcript,
    /// AI relevance analyses keyed by video id + category
    Analysis,
}

impl Namespace {
    /// Stable string form used inside rendered keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Search => "search",
            Namespace::Transcript => "transcript",
            Namespace::Analysis => "analysis",
        }
    }

    /// All namespaces, in probe-friendly order.
    pub fn all() -> [Namespace; 3] {
        [Namespace::Search, Namespace::Transcript, Namespace::Analysis]
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "search" => Ok(Namespace::Search),
            "transcript" => Ok(Namespace::Transcript),
            "analysis" => Ok(Namespace::Analysis),
            other => Err(format!("unknown namespace: {other}")),
        }
    }
}

/// Canonical cache key.
///
/// Rendered as `<namespace>:v<version>:<32-hex-digest>`. The rendered string
/// is the identity: equality and hashing go through it, so a digest
/// collision (astronomically unlikely at 128 bits) would surface as a wrong
/// payload at the typed decode boundary, never as unsoundness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    namespace: Namespace,
    version: u32,
    rendered: String,
}

impl CacheKey {
    fn new(namespace: Namespace, version: u32, digest: u128) -> Self {
        let rendered = format!("{}:v{}:{:032x}", namespace.as_str(), version, digest);
        Self {
            namespace,
            version,
            rendered,
        }
    }

    /// Namespace this key belongs to.
    #[inline]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Key format version.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Rendered key string (the storage identity).
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// True if this key belongs to the given namespace.
    #[inline]
    pub fn in_namespace(&self, namespace: Namespace) -> bool {
        self.namespace == namespace
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Generates canonical cache keys from request parameters.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    version: u32,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    /// Generator for the current key format.
    pub fn new() -> Self {
        Self {
            version: KEY_VERSION,
        }
    }

    /// Generator pinned to an explicit key format version.
    pub fn with_version(version: u32) -> Self {
        Self { version }
    }

    /// Derive the canonical key for `params` under `namespace`.
    ///
    /// Fails with [`CacheError::InvalidKeyInput`] when `params` cannot be
    /// represented as JSON (non-string map keys, failing `Serialize` impls).
    /// Callers must not cache anything on that path.
    pub fn generate<P: Serialize>(&self, namespace: Namespace, params: &P) -> Result<CacheKey> {
        let value =
            serde_json::to_value(params).map_err(|e| CacheError::InvalidKeyInput {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })?;

        let canonical = canonicalize(value);
        let text =
            serde_json::to_string(&canonical).map_err(|e| CacheError::InvalidKeyInput {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })?;

        let digest = digest128(text.as_bytes());
        Ok(CacheKey::new(namespace, self.version, digest))
    }
}

/// Normalize a JSON value into its canonical form.
///
/// Objects are rebuilt with sorted keys and null members dropped; string
/// values are lowercased; arrays recurse in place.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other,
    }
}

/// 128-bit digest from two independently seeded fx-style hash passes.
fn digest128(bytes: &[u8]) -> u128 {
    let hi = fx_hash(bytes, 0x517c_c1b7_2722_0a95);
    let lo = fx_hash(bytes, 0x9e37_79b9_7f4a_7c15);
    ((hi as u128) << 64) | lo as u128
}

/// Fast non-cryptographic hash (FxHash algorithm) with a caller seed.
#[inline]
fn fx_hash(bytes: &[u8], seed: u64) -> u64 {
    const MULT: u64 = 0x517c_c1b7_2722_0a95;
    let mut hash = seed;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(MULT);
    }
    hash
}

// =============================================================================
// Tests
// =============================================================================
