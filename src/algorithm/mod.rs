//! Counting algorithm engine.
//!
//! Four interchangeable strategies with different accuracy/cost tradeoffs:
//!
//! | Algorithm | Accuracy | Cost | Notes |
//! |-----------|----------|------|-------|
//! | Fixed window | up to ~2x across a boundary | O(1) | cheapest, default |
//! | Sliding window | bounded approximation error | O(precision) | balanced |
//! | Sliding log | exact | O(log n) per op | no burst leakage |
//! | Token bucket | exact average rate | O(1) | burst tolerant |
//!
//! Each strategy performs its read-modify-write as a single atomic store
//! operation and always (re)sets an expiry on its keys. Dispatch over
//! [`Algorithm`] is exhaustive: adding a strategy is a compile-time change.

mod fixed_window;
mod sliding_log;
mod sliding_window;
mod token_bucket;

use crate::decision::Decision;
use crate::error::Result;
use crate::identifier::AppliedPolicy;
use crate::options::Algorithm;
use crate::storage::{Store, current_timestamp_ms};

/// Run the policy's algorithm against the store and produce a decision.
pub(crate) async fn execute<S: Store>(
    store: &S,
    key: &str,
    policy: &AppliedPolicy,
) -> Result<Decision> {
    match &policy.algorithm {
        Algorithm::FixedWindow => {
            fixed_window::check(store, key, policy.limit, policy.window).await
        }
        Algorithm::SlidingWindow { precision } => {
            sliding_window::check(store, key, policy.limit, policy.window, *precision).await
        }
        Algorithm::SlidingLog => sliding_log::check(store, key, policy.limit, policy.window).await,
        Algorithm::TokenBucket {
            bucket_size,
            refill_rate,
        } => token_bucket::check(store, key, *bucket_size, *refill_rate).await,
    }
}

/// Current timestamp in whole seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    current_timestamp_ms() / 1000
}
