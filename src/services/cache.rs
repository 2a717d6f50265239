use anyhow::Result;
use moka::future::Cache;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Idempotency store keyed by request id. Entries are immutable posting
/// outcomes, so nothing here ever expires; memory capacity is bounded and
/// redis (when configured) makes dedup survive restarts. The external ledger
/// remains the authoritative dedup boundary — this store only short-circuits
/// the common retry path.
pub struct DedupStore {
    redis: Option<redis::aio::ConnectionManager>,
    memory: Arc<Cache<String, String>>,
}

impl DedupStore {
    pub async fn new(redis_url: Option<&str>) -> Result<Self> {
        let redis = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match client.get_connection_manager().await {
                    Ok(conn) => {
                        tracing::info!("Redis dedup store connected");
                        Some(conn)
                    }
                    Err(e) => {
                        tracing::warn!("Redis connection failed: {}, dedup is in-memory only", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Redis client creation failed: {}, dedup is in-memory only", e);
                    None
                }
            },
            None => None,
        };

        let memory = Arc::new(Cache::builder().max_capacity(10_000).build());

        Ok(Self { redis, memory })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(cached) = self.memory.get(key).await {
            if let Ok(value) = serde_json::from_str(&cached) {
                return Ok(Some(value));
            }
        }

        if let Some(mut redis) = self.redis.clone() {
            match redis.get::<_, Option<String>>(key).await {
                Ok(Some(cached)) => {
                    if let Ok(value) = serde_json::from_str(&cached) {
                        self.memory.insert(key.to_string(), cached).await;
                        tracing::debug!("Redis dedup hit for key: {}", key);
                        return Ok(Some(value));
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Redis get error: {}", e),
            }
        }

        Ok(None)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value)?;

        self.memory.insert(key.to_string(), serialized.clone()).await;

        if let Some(mut redis) = self.redis.clone() {
            if let Err(e) = redis.set::<_, _, ()>(key, serialized).await {
                tracing::warn!("Redis set error: {}", e);
            }
        }

        Ok(())
    }

    pub async fn ping(&self) -> Result<bool> {
        if let Some(mut redis) = self.redis.clone() {
            match redis::cmd("PING").query_async::<_, String>(&mut redis).await {
                Ok(_) => Ok(true),
                Err(_) => Ok(false),
            }
        } else {
            // Memory-only mode is always reachable
            Ok(true)
        }
    }
}
