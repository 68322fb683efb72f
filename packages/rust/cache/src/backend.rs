use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Pool, Runtime};
use docflow_shared::{DocflowError, Result};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A string key/value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// How often a write sweeps the whole map for expired entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// In-process cache. Expired entries are dropped on read, and a write sweeps
/// the map at most once per [`PURGE_INTERVAL`] so keys that are never read
/// again (list pages under a superseded version) are still released.
pub struct MemoryCache {
    state: RwLock<MemoryState>,
}

struct MemoryState {
    entries: HashMap<String, (String, Instant)>,
    next_purge: Instant,
}

impl MemoryState {
    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        self.next_purge = now + PURGE_INTERVAL;
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                entries: HashMap::new(),
                next_purge: Instant::now() + PURGE_INTERVAL,
            }),
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let state = self.state.read().await;
            match state.entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: evict unless a writer refreshed it in between.
        let mut state = self.state.write().await;
        if state
            .entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at <= now)
        {
            state.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if now >= state.next_purge {
            state.purge_expired(now);
        }
        state.entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.write().await.entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Redis-backed cache over a connection pool.
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// Build a pool for `url`. No connection is made until first use.
    pub fn new(url: &str) -> Result<Self> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DocflowError::Cache(format!("invalid redis config: {e}")))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| DocflowError::Cache(e.to_string()))
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    #[tracing::instrument(name = "cache:redis_get", skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| DocflowError::Cache(e.to_string()))
    }

    #[tracing::instrument(name = "cache:redis_set", skip(self, value), err)]
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        // PSETEX rejects a zero expiry.
        let millis = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(|e| DocflowError::Cache(e.to_string()))
    }

    #[tracing::instrument(name = "cache:redis_del", skip(self), err)]
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| DocflowError::Cache(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Disabled
// ---------------------------------------------------------------------------

/// This doesn't cache anything. Every read is a miss.
pub struct NoCache;

#[async_trait]
impl CacheBackend for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_release_entries_that_are_never_read_again() {
        let cache = MemoryCache::new();
        for version in 0..1000 {
            cache
                .set(
                    &format!("docs:user-1:v{version}:list"),
                    "[]".into(),
                    Duration::from_secs(300),
                )
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache
            .set("docs:user-1:v1000:list", "[]".into(), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_live_entries() {
        let cache = MemoryCache::new();
        cache.set("short", "a".into(), Duration::from_secs(30)).await.unwrap();
        cache.set("long", "b".into(), Duration::from_secs(600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        cache.set("fresh", "c".into(), Duration::from_secs(30)).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("long").await.unwrap().as_deref(), Some("b"));
        assert_eq!(cache.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_delete() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("never-set").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_cache_always_misses() {
        let cache = NoCache;
        cache
            .set("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[test]
    fn redis_rejects_bad_url() {
        assert!(RedisCache::new("not a url").is_err());
    }
}
