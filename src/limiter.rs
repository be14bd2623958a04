//! The rate limit dispatcher.
//!
//! Reentrant and stateless between calls apart from the local rejection
//! cache; all cross-instance state lives in the shared store. The public
//! boundary never returns an error: a degraded limiter (store outage,
//! configuration gap, no usable identity) resolves to an `Unevaluated`
//! outcome and a log line, favoring availability over strict enforcement.

use std::env;
use std::time::Duration;

use tracing::{error, warn};

use crate::algorithm::{self, now_secs};
use crate::cache::{CacheKey, DecisionCache};
use crate::context::{ActionContext, IdentityResolver, NoIdentity, RequestLike, ResolvedContext};
use crate::decision::{HttpOutcome, Outcome, SkipReason};
use crate::error::LimiterError;
use crate::identifier;
use crate::options::RateLimitOptions;
use crate::storage::Store;

/// Environment variable supplying the IP-hash salt.
pub const ENV_IP_SALT: &str = "GATELIMIT_IP_SALT";

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Distributed rate limiter over a shared store.
///
/// # Example
///
/// ```ignore
/// use gatelimit::{MemoryStore, RateLimiter, RateLimitOptions, ActionContext};
/// use std::time::Duration;
///
/// # async fn example() {
/// let limiter = RateLimiter::builder(MemoryStore::new())
///     .ip_salt("long-random-salt")
///     .build();
///
/// let opts = RateLimitOptions::new(10, Duration::from_secs(60));
/// let ctx = ActionContext::new("/api/survey").with_user("user-1");
/// let outcome = limiter.check_action(ctx, &opts).await;
/// if !outcome.permits() {
///     // reject the action
/// }
/// # }
/// ```
pub struct RateLimiter<S, I = NoIdentity> {
    store: S,
    identity: I,
    ip_salt: String,
    cache: DecisionCache,
}

impl<S: Store> RateLimiter<S, NoIdentity> {
    /// Start building a limiter over the given store.
    ///
    /// Must be called within a tokio runtime (the cache sweeper is spawned
    /// at build time).
    pub fn builder(store: S) -> RateLimiterBuilder<S, NoIdentity> {
        RateLimiterBuilder {
            store,
            identity: NoIdentity,
            ip_salt: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl<S: Store, I> RateLimiter<S, I> {
    /// Evaluate an HTTP-style call.
    ///
    /// Returns [`HttpOutcome::Pass`] (continue) or a 429 rejection. Never
    /// returns an error; degraded evaluations pass through.
    pub async fn check_request<R>(&self, request: &R, options: &RateLimitOptions) -> HttpOutcome
    where
        R: RequestLike + Sync,
        I: IdentityResolver<R>,
    {
        let ctx = ResolvedContext::from_request(request, &self.identity).await;
        let outcome = self.evaluate(ctx, options).await;
        HttpOutcome::render(outcome, options.include_headers, now_secs())
    }

    /// Evaluate an explicit action-style call.
    ///
    /// Callers must treat [`Outcome::Unevaluated`] as allowed.
    pub async fn check_action(&self, ctx: ActionContext, options: &RateLimitOptions) -> Outcome {
        let ctx = match ctx.resolve() {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(error = %err, "rate limit misconfigured; allowing");
                return Outcome::Unevaluated(SkipReason::MissingPath);
            }
        };
        self.evaluate(ctx, options).await
    }

    /// Stop the local-cache sweeper. The limiter remains usable; cache
    /// entries then expire lazily on lookup.
    pub fn shutdown(&self) {
        self.cache.stop();
    }

    async fn evaluate(&self, ctx: ResolvedContext, options: &RateLimitOptions) -> Outcome {
        if let Some(bypass) = &options.bypass {
            if bypass.evaluate(&ctx).await {
                return Outcome::Unevaluated(SkipReason::Bypassed);
            }
        }

        let (id, policy) = match identifier::resolve(&ctx, options, &self.ip_salt) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return Outcome::Unevaluated(SkipReason::NoIdentity),
            Err(err) => {
                warn!(path = %ctx.path, error = %err, "rate limit misconfigured; allowing");
                return Outcome::Unevaluated(SkipReason::InvalidConfig);
            }
        };

        let store_key = identifier::store_key(&options.key_prefix, &ctx.path, &id);
        let cache_key = CacheKey::new(&store_key, &policy);

        if options.use_local_cache {
            if let Some(decision) = self.cache.lookup(&cache_key, options.local_cache_ttl) {
                return Outcome::Limited(decision);
            }
        }

        let decision = match algorithm::execute(&self.store, &store_key, &policy).await {
            Ok(decision) => decision,
            Err(LimiterError::Config(err)) => {
                warn!(path = %ctx.path, error = %err, "rate limit misconfigured; allowing");
                return Outcome::Unevaluated(SkipReason::InvalidConfig);
            }
            Err(LimiterError::Store(err)) => {
                error!(path = %ctx.path, error = %err, "rate limit store unavailable; allowing");
                return Outcome::Unevaluated(SkipReason::StoreUnavailable);
            }
        };

        if decision.limited {
            warn!(
                kind = id.kind.as_str(),
                id = %id.value,
                path = %ctx.path,
                algorithm = policy.algorithm.name(),
                reset = decision.reset,
                "rate limit exceeded"
            );
            if options.use_local_cache {
                self.cache
                    .record(cache_key, decision.clone(), options.local_cache_ttl);
            }
            Outcome::Limited(decision)
        } else {
            Outcome::Allowed(decision)
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<S, I> {
    store: S,
    identity: I,
    ip_salt: Option<String>,
    sweep_interval: Duration,
}

impl<S: Store, I> RateLimiterBuilder<S, I> {
    /// Set the identity resolver.
    pub fn identity<J>(self, identity: J) -> RateLimiterBuilder<S, J> {
        RateLimiterBuilder {
            store: self.store,
            identity,
            ip_salt: self.ip_salt,
            sweep_interval: self.sweep_interval,
        }
    }

    /// Set the salt for IP hashing. Defaults to [`ENV_IP_SALT`], or empty.
    pub fn ip_salt(mut self, salt: impl Into<String>) -> Self {
        self.ip_salt = Some(salt.into());
        self
    }

    /// Set the local-cache sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the limiter, spawning the cache sweeper.
    pub fn build(self) -> RateLimiter<S, I> {
        let ip_salt = self
            .ip_salt
            .or_else(|| env::var(ENV_IP_SALT).ok())
            .unwrap_or_default();
        RateLimiter {
            store: self.store,
            identity: self.identity,
            ip_salt,
            cache: DecisionCache::new(self.sweep_interval),
        }
    }
}
