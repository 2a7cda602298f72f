//! L2 distributed cache: a thin, fail-silent Redis/Dragonfly layer shared
//! across processes, narrowed to the advisory, time-bounded semantics the
//! permission cache needs: any Redis error is logged and treated as a
//! miss rather than propagated, since L2 is an optimization and the graph
//! evaluator is always a correct fallback.

use std::time::Duration;

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, Result};
use crate::key::CacheKey;

#[derive(Debug, Clone)]
pub struct DistributedCacheConfig {
    pub url: String,
    pub command_timeout: Duration,
    pub default_ttl_seconds: u64,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            command_timeout: Duration::from_millis(2500),
            default_ttl_seconds: 300,
        }
    }
}

impl DistributedCacheConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = std::env::var("NEXUS_REDIS_URL") {
            cfg.url = url;
        }
        if let Ok(v) = std::env::var("NEXUS_REDIS_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                cfg.command_timeout = Duration::from_millis(ms);
            }
        }
        cfg
    }
}

/// The distributed L2 layer. Every op is wrapped in a short timeout and
/// swallows Redis-side failures: callers treat a `None`/`false`/`0` result
/// as "fall through to L3 or the graph evaluator," never as an error.
pub struct DistributedCache {
    manager: redis::aio::ConnectionManager,
    config: DistributedCacheConfig,
}

impl DistributedCache {
    pub async fn connect(config: DistributedCacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager, config })
    }

    fn bitmap_key(key: &CacheKey) -> String {
        // zone_id deliberately excluded, matching the Tiger cache's key
        // shape (see nexus-tiger) so L2 entries are shared across zones.
        format!(
            "nexus:l1:{}:{}:{}:{}:{}",
            key.subject_type, key.subject_id, key.permission, key.object_type, key.object_id
        )
    }

    pub async fn get(&self, key: &CacheKey) -> Option<(bool, i64)> {
        let redis_key = Self::bitmap_key(key);
        let mut conn = self.manager.clone();
        let fut = async move {
            let raw: Option<String> = conn.get(&redis_key).await?;
            match raw {
                Some(s) => {
                    let value: StoredValue = serde_json::from_str(&s)?;
                    Ok::<_, CacheError>(Some((value.result, value.revision)))
                }
                None => Ok(None),
            }
        };
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "L2 cache get failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::debug!("L2 cache get timed out, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &CacheKey, result: bool, revision: i64, ttl_seconds: u64) {
        let redis_key = Self::bitmap_key(key);
        let value = StoredValue { result, revision };
        let mut conn = self.manager.clone();
        let ttl = if ttl_seconds == 0 {
            self.config.default_ttl_seconds
        } else {
            ttl_seconds
        };
        let fut = async move {
            let encoded = serde_json::to_string(&value)?;
            conn.set_ex::<_, _, ()>(&redis_key, encoded, ttl).await?;
            Ok::<(), CacheError>(())
        };
        if let Err(err) = with_timeout(self.config.command_timeout, fut).await {
            tracing::debug!(error = %err, "L2 cache set failed, continuing without it");
        }
    }

    /// Pattern-based invalidation: `SCAN` rather than `KEYS` so a large
    /// keyspace doesn't block the shared Redis event loop.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut conn = self.manager.clone();
        let pattern = pattern.to_string();
        let fut = async move {
            let mut cursor: u64 = 0;
            let mut deleted = 0u64;
            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(500)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let removed: u64 = conn.del(&keys).await?;
                    deleted += removed;
                }
                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
            Ok::<u64, CacheError>(deleted)
        };
        match with_timeout(self.config.command_timeout, fut).await {
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(error = %err, pattern = %pattern, "L2 pattern invalidation failed");
                0
            }
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        let redis_key = Self::bitmap_key(key);
        let mut conn = self.manager.clone();
        let fut = async move {
            conn.del::<_, ()>(&redis_key).await?;
            Ok::<(), CacheError>(())
        };
        if let Err(err) = with_timeout(self.config.command_timeout, fut).await {
            tracing::debug!(error = %err, "L2 cache invalidate failed");
        }
    }

    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let key = key.to_string();
        let mut conn = self.manager.clone();
        let fut = async move {
            let raw: Option<String> = conn.get(&key).await?;
            raw.map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(CacheError::from)
        };
        match with_timeout(self.config.command_timeout, fut).await {
            Ok(v) => v,
            Err(_) => None,
        }
    }

    pub async fn set_typed<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let key = key.to_string();
        let encoded = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(err) => {
                tracing::debug!(error = %err, "L2 cache serialization failed");
                return;
            }
        };
        let mut conn = self.manager.clone();
        let fut = async move {
            conn.set_ex::<_, _, ()>(&key, encoded, ttl_seconds).await?;
            Ok::<(), CacheError>(())
        };
        if let Err(err) = with_timeout(self.config.command_timeout, fut).await {
            tracing::debug!(error = %err, "L2 cache set_typed failed");
        }
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        let fut = async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<(), CacheError>(())
        };
        with_timeout(self.config.command_timeout, fut).await.is_ok()
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Compute {
            key: String::new(),
            message: "L2 operation timed out".to_string(),
        }),
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredValue {
    result: bool,
    revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_key_excludes_zone() {
        let key = CacheKey::new("user", "alice", "viewer", "file", "/a.txt", Some("zone-1"), 0);
        let k = DistributedCache::bitmap_key(&key);
        assert!(!k.contains("zone-1"));
        assert_eq!(k, "nexus:l1:user:alice:viewer:file:/a.txt");
    }

    // Live-Redis integration tests are intentionally `#[ignore]`d — CI
    // doesn't run a Redis instance for unit test jobs.
    #[tokio::test]
    #[ignore]
    async fn round_trips_through_a_real_redis() {
        let cache = DistributedCache::connect(DistributedCacheConfig::default())
            .await
            .expect("redis available");
        let key = CacheKey::new("user", "alice", "viewer", "file", "/a.txt", None, 0);
        cache.set(&key, true, 7, 60).await;
        assert_eq!(cache.get(&key).await, Some((true, 7)));
        cache.invalidate(&key).await;
        assert_eq!(cache.get(&key).await, None);
    }
}
