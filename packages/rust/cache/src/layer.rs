use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use docflow_shared::{CacheBackendKind, CacheConfig, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::{CacheBackend, MemoryCache, NoCache, RedisCache};
use crate::keys;

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<T> {
    /// A stored value.
    Hit(T),
    /// A stored "does not exist" marker.
    Negative,
    /// Nothing usable was stored.
    Miss,
}

/// Expiry applied to each kind of entry.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub document: Duration,
    pub storage_key: Duration,
    pub list: Duration,
    pub version: Duration,
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            document: Duration::from_secs(config.document_ttl_secs),
            storage_key: Duration::from_secs(config.storage_key_ttl_secs),
            list: Duration::from_secs(config.list_ttl_secs),
            version: Duration::from_secs(config.version_ttl_secs),
        }
    }
}

/// JSON cache with negative entries and per-owner listing versions.
///
/// Values are stored as JSON `Option<T>`; a stored `null` is the negative
/// marker. Backend errors never reach the caller.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self { backend, ttls }
    }

    /// Build the backend selected in `[cache]`.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
            CacheBackendKind::Redis => Arc::new(RedisCache::new(&config.url)?),
            CacheBackendKind::None => Arc::new(NoCache),
        };
        tracing::debug!(backend = ?config.backend, "cache backend ready");
        Ok(Self::new(backend, CacheTtls::from(config)))
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Read and decode an entry.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Cached<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Cached::Miss,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return Cached::Miss;
            }
        };
        match serde_json::from_str::<Option<T>>(&raw) {
            Ok(Some(value)) => Cached::Hit(value),
            Ok(None) => Cached::Negative,
            Err(e) => {
                tracing::warn!(
                    key,
                    "the cached value is not a valid JSON for type '{}': {e}",
                    std::any::type_name::<T>()
                );
                Cached::Miss
            }
        }
    }

    /// Store a value, or a negative marker when `value` is `None`.
    pub async fn set<T: Serialize>(&self, key: &str, value: Option<&T>, ttl: Duration) {
        let raw = match serde_json::to_string(&value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    key,
                    "failed to serialize value to JSON for type '{}': {e}",
                    std::any::type_name::<T>()
                );
                return;
            }
        };
        if let Err(e) = self.backend.set(key, raw, ttl).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key, error = %e, "cache delete failed");
        }
    }

    /// Read-through lookup. On a miss `load` runs and its result, including
    /// `None`, is cached for `ttl`. Errors from `load` are not cached.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match self.get::<T>(key).await {
            Cached::Hit(value) => return Ok(Some(value)),
            Cached::Negative => return Ok(None),
            Cached::Miss => {}
        }
        let loaded = load().await?;
        self.set(key, loaded.as_ref(), ttl).await;
        Ok(loaded)
    }

    /// Current listing version of an owner. Defaults to 1.
    pub async fn version(&self, owner_id: &str) -> u64 {
        match self.get::<u64>(&keys::version_key(owner_id)).await {
            Cached::Hit(version) => version,
            Cached::Negative | Cached::Miss => 1,
        }
    }

    /// Move an owner's listing version forward, orphaning every cached page.
    ///
    /// The new version is wall-clock milliseconds, or one past the current
    /// value if the clock has not moved past it, so versions never repeat.
    pub async fn bump_version(&self, owner_id: &str) -> u64 {
        let current = self.version(owner_id).await;
        let next = now_millis().max(current + 1);
        self.set(&keys::version_key(owner_id), Some(&next), self.ttls.version)
            .await;
        tracing::debug!(owner_id, version = next, "listing version bumped");
        next
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
