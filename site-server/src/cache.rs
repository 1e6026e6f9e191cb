//! Stock cache (`stock:{variant_id}`)
//!
//! Read-through cache for storefront stock reads. Commits invalidate the
//! variants they touched; pricing and commit always read the store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use thiserror::Error;

const STOCK_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(String);

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError(err.to_string())
    }
}

pub fn stock_key(variant_id: i64) -> String {
    format!("stock:{variant_id}")
}

#[async_trait]
pub trait StockCache: Send + Sync {
    async fn get(&self, variant_id: i64) -> Result<Option<i64>, CacheError>;
    async fn put(&self, variant_id: i64, stock: i64) -> Result<(), CacheError>;
    async fn invalidate(&self, variant_ids: &[i64]) -> Result<(), CacheError>;
}

/// Invalidate and log; a stale cache entry expires on its own
pub async fn invalidate_logged(cache: &dyn StockCache, variant_ids: &[i64]) {
    if variant_ids.is_empty() {
        return;
    }
    if let Err(e) = cache.invalidate(variant_ids).await {
        tracing::warn!(error = %e, ?variant_ids, "Stock cache invalidation failed");
    }
}

// =============================================================================
// Redis
// =============================================================================

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Redis cache connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl StockCache for RedisCache {
    async fn get(&self, variant_id: i64) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(stock_key(variant_id)).await?)
    }

    async fn put(&self, variant_id: i64, stock: i64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(stock_key(variant_id), stock, STOCK_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn invalidate(&self, variant_ids: &[i64]) -> Result<(), CacheError> {
        let keys: Vec<String> = variant_ids.iter().map(|id| stock_key(*id)).collect();
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

// =============================================================================
// In-process
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, i64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockCache for MemoryCache {
    async fn get(&self, variant_id: i64) -> Result<Option<i64>, CacheError> {
        Ok(self.entries.get(&stock_key(variant_id)).map(|v| *v))
    }

    async fn put(&self, variant_id: i64, stock: i64) -> Result<(), CacheError> {
        self.entries.insert(stock_key(variant_id), stock);
        Ok(())
    }

    async fn invalidate(&self, variant_ids: &[i64]) -> Result<(), CacheError> {
        for id in variant_ids {
            self.entries.remove(&stock_key(*id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_put_get_invalidate() {
        let cache = MemoryCache::new();
        cache.put(200, 5).await.unwrap();
        cache.put(201, 1).await.unwrap();
        assert_eq!(cache.get(200).await.unwrap(), Some(5));
        invalidate_logged(&cache, &[200]).await;
        assert_eq!(cache.get(200).await.unwrap(), None);
        assert_eq!(cache.get(201).await.unwrap(), Some(1));
    }

    #[test]
    fn keys_live_in_the_stock_namespace() {
        assert_eq!(stock_key(42), "stock:42");
    }
}
