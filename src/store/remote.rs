//! Remote Store - Durable Per-User Cold Tier
//!
//! Shared across a user's devices, slowest, network-dependent. Rows are
//! scoped by user id; the backend guarantees row-level isolation. Without an
//! identity context the tier is a silent no-op: it never errors, yields no
//! hits, and accepts no writes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::TierConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::{CacheKey, Namespace};
use crate::policy::EvictionPolicy;
use crate::store::{Tier, TierStore};

/// Opaque user scope token supplied by the host's identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Fresh random id (tests, fixtures).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Supplies the current user scope, if any.
///
/// Implemented by the host's auth layer; the cache only ever asks "who, if
/// anyone, is signed in right now".
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// Fixed identity context: a signed-in user or anonymous.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    /// Identity context for a signed-in user.
    pub fn user(id: UserId) -> Self {
        Self { user: Some(id) }
    }

    /// No identity: the Remote tier becomes a no-op.
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.user
    }
}

/// Per-user durable byte store (upsert/select/delete scoped by user id).
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Load the raw row stored under `(user, key)`, `None` when absent.
    async fn select(&self, user: UserId, key: &str) -> Result<Option<Bytes>>;

    /// Store a raw row under `(user, key)`, replacing any existing one.
    async fn upsert(&self, user: UserId, key: &str, raw: Bytes) -> Result<()>;

    /// Remove a row. Returns whether one existed.
    async fn delete(&self, user: UserId, key: &str) -> Result<bool>;

    /// All keys stored for `user`.
    async fn keys(&self, user: UserId) -> Result<Vec<String>>;

    /// Remove every row stored for `user`.
    async fn clear(&self, user: UserId) -> Result<()>;
}

/// In-memory [`RemoteBackend`] keyed user → key → row (tests).
#[derive(Default)]
pub struct MemoryRemoteBackend {
    rows: DashMap<UserId, DashMap<String, Bytes>>,
}

impl MemoryRemoteBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemoteBackend {
    async fn select(&self, user: UserId, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .rows
            .get(&user)
            .and_then(|scope| scope.get(key).map(|r| r.value().clone())))
    }

    async fn upsert(&self, user: UserId, key: &str, raw: Bytes) -> Result<()> {
        self.rows
            .entry(user)
            .or_default()
            .insert(key.to_string(), raw);
        Ok(())
    }

    async fn delete(&self, user: UserId, key: &str) -> Result<bool> {
        Ok(self
            .rows
            .get(&user)
            .map(|scope| scope.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, user: UserId) -> Result<Vec<String>> {
        Ok(self
            .rows
            .get(&user)
            .map(|scope| scope.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default())
    }

    async fn clear(&self, user: UserId) -> Result<()> {
        if let Some(scope) = self.rows.get(&user) {
            scope.clear();
        }
        Ok(())
    }
}

/// Durable per-user tier.
pub struct RemoteStore {
    backend: Arc<dyn RemoteBackend>,
    identity: Arc<dyn IdentityProvider>,
    config: TierConfig,
    policy: EvictionPolicy,
    expirations: AtomicU64,
}

impl RemoteStore {
    /// Create with default settings (unbounded, 7 day TTL).
    pub fn new(backend: Arc<dyn RemoteBackend>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_config(TierConfig::remote_defaults(), backend, identity)
    }

    /// Create with custom settings.
    pub fn with_config(
        config: TierConfig,
        backend: Arc<dyn RemoteBackend>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            backend,
            identity,
            config,
            policy: EvictionPolicy::new(),
            expirations: AtomicU64::new(0),
        }
    }

    /// TTL expirations removed so far.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    fn current_user(&self) -> Option<UserId> {
        if self.config.enabled {
            self.identity.current_user()
        } else {
            None
        }
    }
}

#[async_trait]
impl TierStore for RemoteStore {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    /// Enabled only with both the config flag and a present identity:
    /// a signed-out session disables this tier transparently.
    fn is_enabled(&self) -> bool {
        self.current_user().is_some()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(user) = self.current_user() else {
            return Ok(None);
        };

        let Some(raw) = self.backend.select(user, key.as_str()).await? else {
            return Ok(None);
        };

        let mut entry = match CacheEntry::from_bytes(key, &raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "evicting corrupt remote row");
                let _ = self.backend.delete(user, key.as_str()).await;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            if self.backend.delete(user, key.as_str()).await? {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(None);
        }

        entry.touch();
        if let Ok(raw) = entry.to_bytes() {
            if let Err(e) = self.backend.upsert(user, key.as_str(), raw).await {
                warn!(key = %key, error = %e, "failed to write back access metadata");
            }
        }

        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry, ttl: Option<Duration>) -> Result<()> {
        let Some(user) = self.current_user() else {
            return Ok(());
        };

        let entry = entry.restamped(ttl.unwrap_or(self.config.default_ttl));
        let raw = entry.to_bytes()?;
        self.backend.upsert(user, entry.key.as_str(), raw).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let Some(user) = self.current_user() else {
            return Ok(false);
        };
        self.backend.delete(user, key.as_str()).await
    }

    async fn has(&self, key: &CacheKey) -> Result<bool> {
        let Some(user) = self.current_user() else {
            return Ok(false);
        };

        let Some(raw) = self.backend.select(user, key.as_str()).await? else {
            return Ok(false);
        };

        match CacheEntry::from_bytes(key, &raw) {
            Ok(entry) if !entry.is_expired() => Ok(true),
            Ok(_) => {
                if self.backend.delete(user, key.as_str()).await? {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false)
            }
            Err(_) => {
                let _ = self.backend.delete(user, key.as_str()).await;
                Ok(false)
            }
        }
    }

    async fn remove_namespace(&self, namespace: Namespace) -> Result<u64> {
        let Some(user) = self.current_user() else {
            return Ok(0);
        };

        let prefix = format!("{}:", namespace.as_str());
        let mut removed = 0;
        for key_str in self.backend.keys(user).await? {
            if key_str.starts_with(&prefix) && self.backend.delete(user, &key_str).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn sweep(&self) -> Result<u64> {
        let Some(user) = self.current_user() else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut entries = Vec::new();
        for key_str in self.backend.keys(user).await? {
            if let Some(raw) = self.backend.select(user, &key_str).await? {
                match CacheEntry::from_stored(&raw) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => {
                        let _ = self.backend.delete(user, &key_str).await;
                    }
                }
            }
        }

        let mut removed = 0;
        for key in self.policy.expired_keys(entries.iter(), now) {
            if self.backend.delete(user, key.as_str()).await? {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let Some(user) = self.current_user() else {
            return Ok(());
        };
        self.backend.clear(user).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyGenerator;
    use serde_json::json;

    fn make_key(id: &str) -> CacheKey {
        KeyGenerator::new()
            .generate(Namespace::Analysis, &json!({ "video_id": id }))
            .unwrap()
    }

    fn make_entry(id: &str) -> CacheEntry {
        CacheEntry::new(make_key(id), json!({ "id": id }), Duration::from_secs(600))
    }

    fn signed_in(backend: Arc<MemoryRemoteBackend>, user: UserId) -> RemoteStore {
        RemoteStore::new(backend, Arc::new(StaticIdentity::user(user)))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = signed_in(Arc::new(MemoryRemoteBackend::new()), UserId::random());
        let entry = make_entry("abc");
        let key = entry.key.clone();

        store.set(entry, None).await.unwrap();

        let hit = store.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.payload, json!({ "id": "abc" }));
        assert!(store.has(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_anonymous_session_is_a_silent_no_op() {
        let backend = Arc::new(MemoryRemoteBackend::new());
        let store = RemoteStore::new(backend.clone(), Arc::new(StaticIdentity::anonymous()));
        let entry = make_entry("abc");
        let key = entry.key.clone();

        assert!(!store.is_enabled());
        store.set(entry, None).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(!store.has(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());

        // nothing reached the backend
        assert!(backend.rows.is_empty());
    }

    #[tokio::test]
    async fn test_rows_are_user_scoped() {
        let backend = Arc::new(MemoryRemoteBackend::new());
        let alice = signed_in(backend.clone(), UserId::random());
        let bob = signed_in(backend, UserId::random());

        let entry = make_entry("abc");
        let key = entry.key.clone();
        alice.set(entry, None).await.unwrap();

        assert!(alice.get(&key).await.unwrap().is_some());
        assert!(bob.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let store = signed_in(Arc::new(MemoryRemoteBackend::new()), UserId::random());
        let entry = make_entry("abc");
        let key = entry.key.clone();
        store
            .set(entry, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.expirations(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_evicted_as_miss() {
        let backend = Arc::new(MemoryRemoteBackend::new());
        let user = UserId::random();
        let store = signed_in(backend.clone(), user);
        let key = make_key("abc");

        backend
            .upsert(user, key.as_str(), Bytes::from_static(b"]["))
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        assert!(backend.select(user, key.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_only_clears_current_user() {
        let backend = Arc::new(MemoryRemoteBackend::new());
        let alice = signed_in(backend.clone(), UserId::random());
        let bob_id = UserId::random();
        let bob = signed_in(backend, bob_id);

        alice.set(make_entry("a"), None).await.unwrap();
        bob.set(make_entry("b"), None).await.unwrap();

        alice.clear().await.unwrap();

        assert!(alice.get(&make_key("a")).await.unwrap().is_none());
        assert!(bob.get(&make_key("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_namespace_scoped_to_user() {
        let store = signed_in(Arc::new(MemoryRemoteBackend::new()), UserId::random());
        store.set(make_entry("a"), None).await.unwrap();
        store.set(make_entry("b"), None).await.unwrap();

        let removed = store.remove_namespace(Namespace::Analysis).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.remove_namespace(Namespace::Search).await.unwrap(), 0);
    }
}
