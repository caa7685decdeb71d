//! Producer Contract
//!
//! The expensive collaborators the cache shields — a search API, a
//! transcript extractor, an AI analysis service — all satisfy one contract:
//! given a namespace and canonical-ready parameters, produce a
//! JSON-serializable value or fail.
//!
//! The cache never retries a producer and never reinterprets its failures;
//! retry/backoff policy belongs to the producer implementation. On a cache
//! miss the coordinator returns [`Lookup::Miss`](crate::coordinator::Lookup)
//! and the caller produces — [`fetch_through`] is that glue, packaged.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::coordinator::{CacheCoordinator, Lookup};
use crate::error::CacheError;
use crate::key::Namespace;
use crate::store::Tier;

/// Failures a producer may report. Opaque to the cache: forwarded to the
/// caller unchanged, never caught or retried here.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// The producer's API quota is exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The producer could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The producer rejected the request parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// An expensive value source fronted by the cache.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Produce the value for `params` in `namespace`.
    async fn produce(&self, namespace: Namespace, params: &Value)
        -> Result<Value, ProducerError>;
}

/// Where a [`fetch_through`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Served from a cache tier without touching the producer.
    Cache(Tier),
    /// Freshly produced (and written through the cache).
    Produced,
}

/// Failures surfaced by [`fetch_through`].
#[derive(Error, Debug)]
pub enum FetchError {
    /// Key derivation or payload-shape failure in the cache layer.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The producer failed; forwarded unchanged.
    #[error(transparent)]
    Producer(#[from] ProducerError),
}

/// Standard caller-side read-through: probe the cache, produce on miss,
/// write the fresh value through every tier, return it.
///
/// A write-through failure never masks a successful production — the value
/// is returned regardless (the coordinator already logged the persistence
/// warning).
pub async fn fetch_through<T, P>(
    cache: &CacheCoordinator,
    producer: &dyn Producer,
    namespace: Namespace,
    params: &P,
) -> Result<(T, ValueSource), FetchError>
where
    T: DeserializeOwned,
    P: Serialize,
{
    if let Lookup::Hit { value, source } = cache.get(namespace, params).await? {
        return Ok((value, ValueSource::Cache(source)));
    }

    let raw_params = serde_json::to_value(params).map_err(|e| CacheError::InvalidKeyInput {
        namespace: namespace.to_string(),
        reason: e.to_string(),
    })?;
    debug!(namespace = %namespace, "cache miss, calling producer");
    let produced = producer.produce(namespace, &raw_params).await?;

    let value: T =
        serde_json::from_value(produced.clone()).map_err(|e| CacheError::Deserialization {
            key: format!("{namespace}:<produced>"),
            reason: e.to_string(),
        })?;

    cache.set(namespace, params, &produced).await?;
    Ok((value, ValueSource::Produced))
}

// =============================================================================
// Tests
// =============================================================================
