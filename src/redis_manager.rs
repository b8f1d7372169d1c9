// Redis backend for the TTL cache.
// Shares cached pool data between processes; entries are the same JSON text the
// other stores hold, so a cache can move between backends without migration.

use crate::store::{KeyValueStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// [`KeyValueStore`] over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    url: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("✅ Redis cache store connected to {}", url);

        Ok(Self {
            conn,
            url: url.to_string(),
        })
    }

    /// Test Redis connection
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;

        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("Unexpected Redis response: {}", pong)
        }
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Glob pattern matching every key that starts with `prefix` literally.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(backend)?;
        debug!("redis GET {} -> {}", key, if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(backend)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.keys(prefix_pattern(prefix)).await.map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern_escapes_glob_characters() {
        assert_eq!(prefix_pattern("network-cache-"), "network-cache-*");
        assert_eq!(prefix_pattern("a*b?"), "a\\*b\\?*");
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_round_trip() {
        let store = RedisStore::connect("redis://localhost:6379").await.unwrap();
        store.health_check().await.unwrap();
        store.write("network-cache-test", "{}").await.unwrap();
        assert_eq!(store.read("network-cache-test").await.unwrap().as_deref(), Some("{}"));
        assert!(store
            .keys("network-cache-")
            .await
            .unwrap()
            .contains(&"network-cache-test".to_string()));
        store.delete("network-cache-test").await.unwrap();
    }
}
