//! Shared-store trait and backends.
//!
//! The store is the only cross-instance state. Each trait method is one
//! atomic read-modify-write against the backend: counters, the sorted-set
//! log, and the token bucket never expose intermediate state to the client,
//! so correctness needs no client-side locking. Every operation (re)sets an
//! expiry on its key so idle identifiers do not leak store memory.

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::{GcConfig, MemoryStore};

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Result of one atomic token-bucket transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Whether a token was consumed.
    pub taken: bool,
    /// Tokens left after the transition.
    pub tokens: f64,
}

/// Shared store backing the counting algorithms.
///
/// Implementations must be thread-safe (`Send + Sync`) and must fail fast
/// rather than block: a slow or unreachable backend surfaces as an `Err`,
/// which the dispatcher converts into a fail-open outcome.
pub trait Store: Send + Sync + 'static {
    /// Atomically increment a window counter and (re)set its expiry.
    ///
    /// Returns the count AFTER incrementing.
    fn incr_window(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<u64>> + Send;

    /// Read a window counter without modifying it.
    ///
    /// Returns 0 for missing or expired keys. Used by the sliding-window
    /// approximation to read adjacent sub-window counts.
    fn read_count(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Atomically trim entries older than `cutoff_ms`, append `member_ms`,
    /// count survivors, and (re)set the expiry in one pipeline.
    ///
    /// Returns the surviving entry count, including the appended member.
    fn log_append(
        &self,
        key: &str,
        member_ms: u64,
        cutoff_ms: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Atomically refill a token bucket to `now_ms` and consume one token
    /// if available.
    fn bucket_take(
        &self,
        key: &str,
        bucket_size: f64,
        refill_rate: f64,
        now_ms: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<BucketState>> + Send;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64> {
        (**self).incr_window(key, ttl).await
    }

    async fn read_count(&self, key: &str) -> Result<u64> {
        (**self).read_count(key).await
    }

    async fn log_append(
        &self,
        key: &str,
        member_ms: u64,
        cutoff_ms: u64,
        ttl: Duration,
    ) -> Result<u64> {
        (**self).log_append(key, member_ms, cutoff_ms, ttl).await
    }

    async fn bucket_take(
        &self,
        key: &str,
        bucket_size: f64,
        refill_rate: f64,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<BucketState> {
        (**self)
            .bucket_take(key, bucket_size, refill_rate, now_ms, ttl)
            .await
    }
}

/// Current timestamp in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
