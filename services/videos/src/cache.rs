//! Shared user cache.
//!
//! Users are stored in Redis under their raw id, MessagePack-encoded, without
//! expiry. Writes overwrite unconditionally; the user service keeps entries
//! fresh by publishing newer copies.

use crate::config::RedisConfig;
use async_trait::async_trait;
use azora_pipeline::User;
use deadpool_redis::{Pool, Runtime};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to create Redis pool: {0}")]
    Pool(String),

    #[error("Redis connection unavailable: {0}")]
    Connection(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Failed to encode user {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: rmp_serde::encode::Error,
    },
}

/// Batched access to cached users
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserCache: Send + Sync {
    /// Fetch the cached subset of `ids`. Absent ids are omitted.
    async fn get_many(&self, ids: &[String]) -> Result<HashMap<String, User>, CacheError>;

    /// Store users under the given ids, overwriting existing entries
    async fn set_many(&self, users: HashMap<String, User>) -> Result<(), CacheError>;
}

/// Redis-backed [`UserCache`]
pub struct RedisUserCache {
    pool: Pool,
}

impl RedisUserCache {
    pub fn new(config: &RedisConfig) -> Result<Self, CacheError> {
        let mut pool_config = deadpool_redis::Config::from_url(config.url.clone());
        pool_config.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    async fn get_many(&self, ids: &[String]) -> Result<HashMap<String, User>, CacheError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.pool.get().await?;
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(ids)
            .query_async(&mut conn)
            .await?;

        let mut users = HashMap::with_capacity(ids.len());
        for (id, value) in ids.iter().zip(values) {
            let Some(bytes) = value else {
                continue;
            };
            match rmp_serde::from_slice::<User>(&bytes) {
                Ok(user) => {
                    users.insert(id.clone(), user);
                }
                Err(e) => {
                    // Treated as a miss; the next population overwrites it.
                    warn!(user_id = %id, error = %e, "Discarding undecodable cache entry");
                    metrics::counter!("videos.cache.decode_errors").increment(1);
                }
            }
        }

        metrics::counter!("videos.cache.hits").increment(users.len() as u64);
        metrics::counter!("videos.cache.misses").increment((ids.len() - users.len()) as u64);
        debug!(found = users.len(), "cache lookup");

        Ok(users)
    }

    #[instrument(skip(self, users), fields(count = users.len()))]
    async fn set_many(&self, users: HashMap<String, User>) -> Result<(), CacheError> {
        if users.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("MSET");
        for (id, user) in &users {
            let bytes = rmp_serde::to_vec_named(user).map_err(|source| CacheError::Encode {
                id: id.clone(),
                source,
            })?;
            cmd.arg(id).arg(bytes);
        }

        let mut conn = self.pool.get().await?;
        let () = cmd.query_async(&mut conn).await?;

        debug!("cache updated");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{user, MemoryUserCache};
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_omits_absent_ids() {
        let cache = MemoryUserCache::with_users([user("u1")]);

        let found = cache
            .get_many(&["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found["u1"], user("u1"));
    }

    #[tokio::test]
    async fn test_redis_cache_skips_round_trip_for_empty_input() {
        // Nothing listens here; any round trip would fail.
        let cache = RedisUserCache::new(&RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
        })
        .unwrap();

        assert!(cache.get_many(&[]).await.unwrap().is_empty());
        assert!(cache.set_many(HashMap::new()).await.is_ok());
    }

    #[test]
    fn test_cache_entry_encoding_matches_wire_users() {
        let encoded = rmp_serde::to_vec_named(&user("u1")).unwrap();
        let decoded: User = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, user("u1"));
    }
}
