//! Per-call rate limit configuration.
//!
//! # Examples
//!
//! ```ignore
//! use gatelimit::{Algorithm, RateLimitOptions};
//! use std::time::Duration;
//!
//! // 10 requests per minute, fixed window, user or hashed-IP scoped
//! let opts = RateLimitOptions::new(10, Duration::from_secs(60));
//!
//! // Token bucket with headers on rejections and a local decision cache
//! let opts = RateLimitOptions::new(100, Duration::from_secs(60))
//!     .with_algorithm(Algorithm::TokenBucket { bucket_size: 20.0, refill_rate: 2.0 })
//!     .with_headers()
//!     .with_local_cache(Duration::from_millis(1000));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ResolvedContext;

/// Environment variable supplying the default primary limit.
pub const ENV_DEFAULT_LIMIT: &str = "GATELIMIT_DEFAULT_LIMIT";

/// Environment variable supplying the default primary window, in seconds.
pub const ENV_DEFAULT_WINDOW_SECS: &str = "GATELIMIT_DEFAULT_WINDOW_SECS";

/// Counting algorithm selector.
///
/// A closed set: every call site matches exhaustively, so adding or removing
/// an algorithm is a compile-time-checked change. Each variant carries only
/// its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Algorithm {
    /// Atomic counter per discrete window. Cheapest; admits up to ~2x the
    /// limit across a window boundary.
    FixedWindow,
    /// Two-plus adjacent windows blended by elapsed time. `precision`
    /// subdivides the window; 1 gives the classic two-window blend.
    SlidingWindow {
        /// Number of sub-windows per window. Clamped to at least 1.
        precision: u32,
    },
    /// Timestamp per request in a sorted set. Exact, highest cost.
    SlidingLog,
    /// Continuously refilling capacity drained per request.
    TokenBucket {
        /// Maximum tokens the bucket holds.
        bucket_size: f64,
        /// Tokens added per second.
        refill_rate: f64,
    },
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::FixedWindow
    }
}

impl Algorithm {
    /// Algorithm name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindow { .. } => "sliding_window",
            Self::SlidingLog => "sliding_log",
            Self::TokenBucket { .. } => "token_bucket",
        }
    }
}

/// Sub-policy applied when no user id is present and the caller is keyed by
/// hashed IP instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpFallback {
    /// Whether anonymous callers may be limited by hashed IP at all.
    pub enabled: bool,
    /// Fallback limit. Defaults to half the primary limit (at least 1).
    pub limit: Option<u64>,
    /// Fallback window. Defaults to the primary window.
    pub window: Option<Duration>,
}

impl IpFallback {
    /// Enable IP fallback with the default derived limit and window.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            limit: None,
            window: None,
        }
    }

    /// Set an explicit fallback limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set an explicit fallback window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }
}

type SyncPredicate = dyn Fn(&ResolvedContext) -> bool + Send + Sync;
type AsyncPredicate =
    dyn Fn(&ResolvedContext) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync;

/// Caller-supplied predicate that can exempt a call from evaluation.
///
/// Evaluated before anything touches the store.
#[derive(Clone)]
pub enum BypassPredicate {
    /// Synchronous predicate.
    Sync(Arc<SyncPredicate>),
    /// Asynchronous predicate.
    Async(Arc<AsyncPredicate>),
}

impl BypassPredicate {
    /// Wrap a synchronous predicate.
    pub fn sync(f: impl Fn(&ResolvedContext) -> bool + Send + Sync + 'static) -> Self {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a predicate returning a future.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(&ResolvedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::Async(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub(crate) async fn evaluate(&self, ctx: &ResolvedContext) -> bool {
        match self {
            Self::Sync(f) => f(ctx),
            Self::Async(f) => f(ctx).await,
        }
    }
}

impl std::fmt::Debug for BypassPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Sync(_) => "sync",
            Self::Async(_) => "async",
        };
        f.debug_tuple("BypassPredicate").field(&kind).finish()
    }
}

/// Configuration for one rate-limit evaluation.
#[derive(Debug, Clone, Default)]
pub struct RateLimitOptions {
    /// Primary limit. Falls back to [`ENV_DEFAULT_LIMIT`] when unset.
    pub limit: Option<u64>,
    /// Primary window. Falls back to [`ENV_DEFAULT_WINDOW_SECS`] when unset.
    pub window: Option<Duration>,
    /// Store key prefix.
    pub key_prefix: String,
    /// Counting algorithm.
    pub algorithm: Algorithm,
    /// Policy for anonymous callers.
    pub ip_fallback: IpFallback,
    /// Optional exemption predicate.
    pub bypass: Option<BypassPredicate>,
    /// Attach rate limit headers to HTTP rejections.
    pub include_headers: bool,
    /// Memoize rejections process-locally.
    pub use_local_cache: bool,
    /// How long a cached rejection may be served.
    pub local_cache_ttl: Duration,
}

impl RateLimitOptions {
    /// Create options with an explicit primary limit and window.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit: Some(limit),
            window: Some(window),
            key_prefix: "rl".to_string(),
            local_cache_ttl: Duration::from_millis(1000),
            ..Default::default()
        }
    }

    /// Create options that rely on the environment-driven defaults.
    pub fn from_env() -> Self {
        Self {
            key_prefix: "rl".to_string(),
            local_cache_ttl: Duration::from_millis(1000),
            ..Default::default()
        }
    }

    /// Set the store key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Select the counting algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the anonymous-caller fallback policy.
    pub fn with_ip_fallback(mut self, fallback: IpFallback) -> Self {
        self.ip_fallback = fallback;
        self
    }

    /// Set the exemption predicate.
    pub fn with_bypass(mut self, bypass: BypassPredicate) -> Self {
        self.bypass = Some(bypass);
        self
    }

    /// Attach rate limit headers to HTTP rejections.
    pub fn with_headers(mut self) -> Self {
        self.include_headers = true;
        self
    }

    /// Enable the process-local rejection cache with the given TTL.
    pub fn with_local_cache(mut self, ttl: Duration) -> Self {
        self.use_local_cache = true;
        self.local_cache_ttl = ttl;
        self
    }
}
