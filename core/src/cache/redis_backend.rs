use super::CacheBackend;
use crate::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed cache store. The connection manager reconnects on its own;
/// each call clones the cheap handle.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(timeout))??;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn whole_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.conn().get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        Ok(self.conn().set_ex::<_, _, ()>(key, value, whole_secs(ttl)).await?)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.conn().del::<_, u64>(keys).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.conn().exists::<_, bool>(key).await?)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        // -2: missing, -1: no expiry
        let secs: i64 = self.conn().ttl(key).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.conn().keys::<_, Vec<String>>(pattern).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        Ok(self.conn().sadd::<_, _, ()>(key, member).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        Ok(self.conn().srem::<_, _, ()>(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.conn().smembers::<_, Vec<String>>(key).await?)
    }

    async fn sinter(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.conn().sinter::<_, Vec<String>>(keys).await?)
    }

    async fn zincr(&self, key: &str, member: &str, by: f64) -> Result<f64, CacheError> {
        Ok(self.conn().zincr::<_, _, _, f64>(key, member, by).await?)
    }

    async fn zrevrange(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        Ok(self.conn().zrevrange::<_, Vec<String>>(key, 0, stop).await?)
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        Ok(self.conn().incr::<_, _, i64>(key, by).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let secs = i64::try_from(whole_secs(ttl)).unwrap_or(i64::MAX);
        Ok(self.conn().expire::<_, ()>(key, secs).await?)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
