//! Redis store backend for cross-instance rate limiting.
//!
//! Uses connection pooling; every read-modify-write is a MULTI/EXEC
//! pipeline or a Lua script, so concurrent instances never observe
//! intermediate state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deadpool_redis::{
    Config, Connection, Pool, Runtime,
    redis::{AsyncCommands, Script, cmd, pipe},
};

use crate::error::{Result, StoreError};
use crate::storage::{BucketState, Store};

/// Refill-and-consume as one script: read, refill by elapsed time, cap at
/// the bucket size, take one token when available, persist, re-expire.
const BUCKET_TAKE_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local ts = tonumber(redis.call('HGET', KEYS[1], 'ts'))
local size = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
if tokens == nil or ts == nil then
  tokens = size
  ts = now
end
if now > ts then
  tokens = math.min(size, tokens + (now - ts) / 1000.0 * rate)
end
local taken = 0
if tokens >= 1 then
  tokens = tokens - 1
  taken = 1
end
redis.call('HSET', KEYS[1], 'tokens', tokens, 'ts', now)
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return {taken, tostring(tokens)}
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379").
    pub url: String,
    /// Backend key namespace, prepended to every limiter key.
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "gl:".to_string(),
        }
    }
}

impl RedisConfig {
    /// Create a configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Redis store backend.
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
    bucket_take: Script,
    log_seq: AtomicU64,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStore {
    /// Create a store from configuration, verifying connectivity.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            bucket_take: Script::new(BUCKET_TAKE_SCRIPT),
            log_seq: AtomicU64::new(0),
        })
    }

    /// Create a store from a URL with the default namespace.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()).into())
    }
}

impl Store for RedisStore {
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let (count,): (u64,) = pipe()
            .atomic()
            .incr(&full_key, 1u64)
            .expire(&full_key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| StoreError::operation_failed(e.to_string()))?;

        Ok(count)
    }

    async fn read_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let count: Option<u64> = conn
            .get(&full_key)
            .await
            .map_err(|e| StoreError::operation_failed(e.to_string()))?;

        Ok(count.unwrap_or(0))
    }

    async fn log_append(
        &self,
        key: &str,
        member_ms: u64,
        cutoff_ms: u64,
        ttl: Duration,
    ) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        // Timestamps may collide within a millisecond; a per-process
        // sequence keeps members unique so ZADD never collapses them.
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let member = format!("{member_ms}:{seq}");

        let (count,): (u64,) = pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&full_key)
            .arg("-inf")
            .arg(format!("({cutoff_ms}"))
            .ignore()
            .cmd("ZADD")
            .arg(&full_key)
            .arg(member_ms)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(&full_key)
            .cmd("PEXPIRE")
            .arg(&full_key)
            .arg(ttl.as_millis() as u64)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| StoreError::operation_failed(e.to_string()))?;

        Ok(count)
    }

    async fn bucket_take(
        &self,
        key: &str,
        bucket_size: f64,
        refill_rate: f64,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<BucketState> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let (taken, tokens): (i64, String) = self
            .bucket_take
            .key(&full_key)
            .arg(bucket_size)
            .arg(refill_rate)
            .arg(now_ms)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StoreError::operation_failed(e.to_string()))?;

        let tokens: f64 = tokens
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("bucket tokens: {tokens}")))?;

        Ok(BucketState {
            taken: taken == 1,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("redis://localhost:6380").with_prefix("test:");

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.key_prefix, "test:");
    }
}
