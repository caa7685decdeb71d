//! Local Store - Durable Per-Device Warm Tier
//!
//! Survives process restarts but not necessarily across devices. The store
//! itself is a codec layer: entries are encoded to JSON on write and
//! decoded-and-validated on read, over a pluggable [`LocalBackend`]
//! byte-store. A row that fails to decode is corrupt; it is evicted and the
//! lookup reported as a miss, never an error to the caller.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::TierConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, Namespace};
use crate::policy::EvictionPolicy;
use crate::store::{Tier, TierStore};

/// Device-local persistent byte store keyed by rendered cache key.
///
/// Implementations store opaque serialized rows; all entry semantics live in
/// [`LocalStore`].
#[async_trait]
pub trait LocalBackend: Send + Sync {
    /// Load the raw row for a key, `None` when absent.
    async fn load(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a raw row, replacing any existing one.
    async fn store(&self, key: &str, raw: Bytes) -> Result<()>;

    /// Remove a row. Returns whether one existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// All stored keys.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every row.
    async fn clear(&self) -> Result<()>;
}

/// In-memory [`LocalBackend`] for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryBackend {
    rows: DashMap<String, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.rows.get(key).map(|r| r.value().clone()))
    }

    async fn store(&self, key: &str, raw: Bytes) -> Result<()> {
        self.rows.insert(key.to_string(), raw);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.rows.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.rows.iter().map(|r| r.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

/// Filesystem [`LocalBackend`]: one JSON file per key under a cache
/// directory.
///
/// Rendered keys contain `:` which is unfriendly to filesystems, so file
/// names use `-` in its place; keys never contain `-` themselves
/// (namespace is alphabetic, digest is lowercase hex), making the mapping
/// reversible. A torn write decodes as corrupt and is evicted on the next
/// read.
pub struct FsBackend {
    dir: PathBuf,
}

impl FsBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key.replace(':', "-")))
    }

    fn key_for(file_name: &str) -> Option<String> {
        file_name
            .strip_suffix(".json")
            .map(|stem| stem.replace('-', ":"))
    }
}

#[async_trait]
impl LocalBackend for FsBackend {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(raw) => Ok(Some(Bytes::from(raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn store(&self, key: &str, raw: Bytes) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), &raw).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if let Some(key) = item
                .file_name()
                .to_str()
                .and_then(FsBackend::key_for)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

/// Durable per-device tier.
pub struct LocalStore {
    backend: Arc<dyn LocalBackend>,
    config: TierConfig,
    policy: EvictionPolicy,
    /// Serializes capacity enforcement across concurrent writers.
    write_lock: tokio::sync::Mutex<()>,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalStore {
    /// Create over a backend with default settings (500 entries, 24 h TTL).
    pub fn new(backend: Arc<dyn LocalBackend>) -> Self {
        Self::with_config(TierConfig::local_defaults(), backend)
    }

    /// Create with custom settings.
    pub fn with_config(config: TierConfig, backend: Arc<dyn LocalBackend>) -> Self {
        Self {
            backend,
            config,
            policy: EvictionPolicy::new(),
            write_lock: tokio::sync::Mutex::new(()),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// In-memory-backed store (tests).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Capacity evictions performed so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// TTL expirations removed so far.
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Load and decode one row; corrupt rows are evicted in place.
    async fn load_row(&self, key_str: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.backend.load(key_str).await? else {
            return Ok(None);
        };

        match CacheEntry::from_stored(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = key_str, error = %e, "evicting corrupt local row");
                let _ = self.backend.remove(key_str).await;
                Ok(None)
            }
        }
    }

    /// Decode every stored row, evicting corrupt ones as they are found.
    async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key_str in self.backend.keys().await? {
            if let Some(entry) = self.load_row(&key_str).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Make room for one insert: drop expired rows first, then LRU victims.
    /// Caller holds `write_lock`.
    async fn make_room(&self, capacity: usize) -> Result<()> {
        let mut entries = self.load_all().await?;
        let now = Utc::now();

        for key in self.policy.expired_keys(entries.iter(), now) {
            if self.backend.remove(key.as_str()).await? {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.retain(|e| !e.is_expired_at(now));

        while entries.len() >= capacity {
            let Some(victim) = self.policy.select_victim(entries.iter()) else {
                break;
            };
            if self.backend.remove(victim.as_str()).await? {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, "evicted LRU entry from local tier");
            }
            entries.retain(|e| e.key != victim);
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for LocalStore {
    fn tier(&self) -> Tier {
        Tier::Local
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let Some(raw) = self.backend.load(key.as_str()).await? else {
            return Ok(None);
        };

        let mut entry = match CacheEntry::from_bytes(key, &raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "evicting corrupt local row");
                let _ = self.backend.remove(key.as_str()).await;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            if self.backend.remove(key.as_str()).await? {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(None);
        }

        // Write the touched metadata back; the read already succeeded, so a
        // failed write-back only ages the LRU ordering slightly.
        entry.touch();
        if let Ok(raw) = entry.to_bytes() {
            if let Err(e) = self.backend.store(key.as_str(), raw).await {
                warn!(key = %key, error = %e, "failed to write back access metadata");
            }
        }

        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry, ttl: Option<Duration>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let entry = entry.restamped(ttl.unwrap_or(self.config.default_ttl));
        let raw = entry.to_bytes()?;

        let _guard = self.write_lock.lock().await;
        if let Some(capacity) = self.config.max_entries {
            let replacing = self.backend.load(entry.key.as_str()).await?.is_some();
            if !replacing && self.backend.keys().await?.len() >= capacity {
                self.make_room(capacity).await?;
            }
        }
        self.backend.store(entry.key.as_str(), raw).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.backend.remove(key.as_str()).await
    }

    async fn has(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        match self.load_row(key.as_str()).await? {
            Some(entry) if !entry.is_expired() => Ok(true),
            Some(_) => {
                if self.backend.remove(key.as_str()).await? {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn remove_namespace(&self, namespace: Namespace) -> Result<u64> {
        let prefix = format!("{}:", namespace.as_str());
        let mut removed = 0;
        for key_str in self.backend.keys().await? {
            if key_str.starts_with(&prefix) && self.backend.remove(&key_str).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn sweep(&self) -> Result<u64> {
        let now = Utc::now();
        let entries = self.load_all().await?;

        let mut removed = 0;
        for key in self.policy.expired_keys(entries.iter(), now) {
            if self.backend.remove(key.as_str()).await? {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.backend.clear().await
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
            .generate(Namespace::Transcript, &json!({ "video_id": id }))
            .unwrap()
    }

    fn make_entry(id: &str) -> CacheEntry {
        CacheEntry::new(make_key(id), json!({ "id": id }), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = LocalStore::in_memory();
        let entry = make_entry("abc");
        let key = entry.key.clone();

        store.set(entry, None).await.unwrap();

        let hit = store.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.payload, json!({ "id": "abc" }));
        assert!(store.has(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_store_recreation() {
        let backend = Arc::new(MemoryBackend::new());

        let first = LocalStore::new(backend.clone());
        first.set(make_entry("abc"), None).await.unwrap();
        drop(first);

        let second = LocalStore::new(backend);
        let hit = second.get(&make_key("abc")).await.unwrap();
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let store = LocalStore::in_memory();
        let entry = make_entry("abc");
        let key = entry.key.clone();
        store
            .set(entry, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get(&key).await.unwrap().is_none());
        assert!(!store.has(&key).await.unwrap());
        assert_eq!(store.expirations(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_evicted_as_miss() {
        let backend = Arc::new(MemoryBackend::new());
        let store = LocalStore::new(backend.clone());
        let key = make_key("abc");

        backend
            .store(key.as_str(), Bytes::from_static(b"{ not json"))
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
        // the corrupt row is gone
        assert!(backend.load(key.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_lru() {
        let store = LocalStore::with_config(
            TierConfig {
                enabled: true,
                max_entries: Some(2),
                default_ttl: Duration::from_secs(600),
            },
            Arc::new(MemoryBackend::new()),
        );

        store.set(make_entry("a"), None).await.unwrap();
        store.set(make_entry("b"), None).await.unwrap();

        // Touch a; b becomes the LRU victim
        store.get(&make_key("a")).await.unwrap();
        store.set(make_entry("c"), None).await.unwrap();

        assert!(store.has(&make_key("a")).await.unwrap());
        assert!(!store.has(&make_key("b")).await.unwrap());
        assert!(store.has(&make_key("c")).await.unwrap());
        assert_eq!(store.evictions(), 1);
    }

    #[tokio::test]
    async fn test_remove_namespace_only_touches_matching_keys() {
        let store = LocalStore::in_memory();
        let gen = KeyGenerator::new();

        store.set(make_entry("a"), None).await.unwrap();
        let search_key = gen
            .generate(Namespace::Search, &json!({ "query": "rust" }))
            .unwrap();
        store
            .set(
                CacheEntry::new(search_key.clone(), json!([]), Duration::from_secs(600)),
                None,
            )
            .await
            .unwrap();

        let removed = store.remove_namespace(Namespace::Transcript).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.has(&search_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let store = LocalStore::in_memory();
        store
            .set(make_entry("stale"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set(make_entry("live"), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(store.has(&make_key("live")).await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(Arc::new(FsBackend::new(dir.path())));

        let entry = make_entry("abc");
        let key = entry.key.clone();
        store.set(entry, None).await.unwrap();

        let hit = store.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.payload, json!({ "id": "abc" }));
    }

    #[tokio::test]
    async fn test_fs_backend_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = LocalStore::new(Arc::new(FsBackend::new(dir.path())));
            store.set(make_entry("abc"), None).await.unwrap();
        }

        let reopened = LocalStore::new(Arc::new(FsBackend::new(dir.path())));
        assert!(reopened.get(&make_key("abc")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fs_backend_key_mapping_is_reversible() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let key = make_key("abc");

        backend
            .store(key.as_str(), Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let keys = backend.keys().await.unwrap();
        assert_eq!(keys, vec![key.as_str().to_string()]);
    }

    #[tokio::test]
    async fn test_fs_backend_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path().join("never-created"));
        backend.clear().await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());
    }
}
