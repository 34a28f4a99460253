use crate::{Cache, CoreError};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::info;

/// Redis implementation of the Cache port. Keys are namespaced with a prefix
/// so several deployments can share one Redis database.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    key_prefix: String,
    default_ttl_seconds: u64,
}

impl RedisCache {
    pub async fn new(
        redis_url: &str,
        key_prefix: &str,
        default_ttl_seconds: u64,
    ) -> Result<Self, CoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| CoreError::Configuration(format!("Invalid Redis URL: {}", e)))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(CoreError::infra)?;
        info!("Redis cache connected (prefix '{}').", key_prefix);
        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            default_ttl_seconds,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key)).await.map_err(CoreError::infra)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl_seconds: Option<u64>,
    ) -> Result<(), CoreError> {
        let mut conn = self.connection.clone();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        conn.set_ex(self.key(key), value, ttl)
            .await
            .map_err(CoreError::infra)
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.connection.clone();
        conn.del(self.key(key))
            .await
            .map(|_: usize| ())
            .map_err(CoreError::infra)
    }
}
