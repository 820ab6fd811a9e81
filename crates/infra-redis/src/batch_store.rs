// Redis BatchStore Implementation
//
// Every port method is exactly one Redis command, so per-key atomicity comes
// straight from the server.

use crate::error::map_redis_error;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tally_core::error::Result;
use tally_core::port::BatchStore;

#[derive(Clone)]
pub struct RedisBatchStore {
    conn: MultiplexedConnection,
}

impl RedisBatchStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    /// Connect and wrap in one step
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(crate::connection::connect(url).await?))
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl BatchStore for RedisBatchStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.conn().hget(key, field).await.map_err(map_redis_error)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.conn().hgetall(key).await.map_err(map_redis_error)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let _: () = self
            .conn()
            .hset(key, field, value)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.conn()
            .hset_nx(key, field, value)
            .await
            .map_err(map_redis_error)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let _: () = self.conn().hdel(key, field).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.conn()
            .hincr(key, field, delta)
            .await
            .map_err(map_redis_error)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let added: i64 = self.conn().sadd(key, member).await.map_err(map_redis_error)?;
        Ok(added > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> =
            self.conn().smembers(key).await.map_err(map_redis_error)?;
        members.sort();
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> Result<u64> {
        self.conn().scard(key).await.map_err(map_redis_error)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<()> {
        let _: () = self.conn().lpush(key, value).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        self.conn().lrange(key, 0, -1).await.map_err(map_redis_error)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.conn().exists(key).await.map_err(map_redis_error)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn().del(keys).await.map_err(map_redis_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: () = self
            .conn()
            .pexpire(key, ttl.as_millis() as i64)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}
