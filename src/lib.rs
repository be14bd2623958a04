//! Distributed, fail-open request rate limiting.
//!
//! `gatelimit` enforces per-identifier quotas consistently across
//! concurrently running server instances, backed by a shared store:
//!
//! - **Two call shapes**: HTTP-request-like objects and explicit action
//!   contexts, normalized once at the boundary
//! - **Safe identity**: user-scoped quotas with a salted-hash IP fallback;
//!   raw addresses never reach the store
//! - **Four algorithms**: fixed window, sliding window approximation,
//!   sliding window log, token bucket, all race-free against the store
//! - **Fail-open**: a degraded store or configuration gap resolves to a
//!   distinguishable "unevaluated" outcome, never an error or a block
//! - **Local rejection cache**: optional short-TTL memo that shortcuts
//!   repeated-call bursts against an already-rejected identifier
//!
//! # Quick Start
//!
//! ```ignore
//! use gatelimit::{ActionContext, MemoryStore, RateLimiter, RateLimitOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::builder(MemoryStore::new())
//!         .ip_salt("long-random-salt")
//!         .build();
//!
//!     let opts = RateLimitOptions::new(10, Duration::from_secs(60));
//!     let ctx = ActionContext::new("/api/survey").with_user("user-1");
//!
//!     let outcome = limiter.check_action(ctx, &opts).await;
//!     if outcome.permits() {
//!         // proceed
//!     } else {
//!         // over quota
//!     }
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `memory` (default): in-memory store with garbage collection
//! - `redis`: Redis store backend over a connection pool

mod algorithm;
mod cache;
pub mod context;
pub mod decision;
pub mod error;
pub mod headers;
pub mod identifier;
pub mod limiter;
pub mod options;
pub mod storage;

// Re-export main types
pub use context::{ActionContext, IdentityResolver, NoIdentity, RequestLike, ResolvedContext};
pub use decision::{Decision, HttpOutcome, Outcome, Rejection, SkipReason};
pub use error::{ConfigError, LimiterError, Result, StoreError};
pub use headers::RateLimitHeaders;
pub use identifier::{IdKind, Identifier};
pub use limiter::{ENV_IP_SALT, RateLimiter, RateLimiterBuilder};
pub use options::{
    Algorithm, BypassPredicate, ENV_DEFAULT_LIMIT, ENV_DEFAULT_WINDOW_SECS, IpFallback,
    RateLimitOptions,
};
pub use storage::{BucketState, Store};

// Re-export storage backends
#[cfg(feature = "memory")]
pub use storage::{GcConfig, MemoryStore};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStore};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::{ActionContext, IdentityResolver, RequestLike};
    pub use crate::decision::{Decision, HttpOutcome, Outcome, SkipReason};
    pub use crate::limiter::RateLimiter;
    pub use crate::options::{Algorithm, IpFallback, RateLimitOptions};
    pub use crate::storage::Store;

    #[cfg(feature = "memory")]
    pub use crate::storage::MemoryStore;

    #[cfg(feature = "redis")]
    pub use crate::storage::{RedisConfig, RedisStore};
}
