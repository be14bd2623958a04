//! Token bucket.

use std::time::Duration;

use crate::decision::Decision;
use crate::error::{ConfigError, Result};
use crate::storage::{Store, current_timestamp_ms};

/// Continuously refilling capacity drained one token per request.
///
/// Refill is computed from elapsed time at the store, capped at the bucket
/// size; tokens never go negative. `reset` is the time at which the bucket
/// is full again, not merely when the next token arrives.
pub(crate) async fn check<S: Store>(
    store: &S,
    key: &str,
    bucket_size: f64,
    refill_rate: f64,
) -> Result<Decision> {
    if !(bucket_size >= 1.0) || !(refill_rate > 0.0) {
        return Err(ConfigError::InvalidAlgorithmParams(format!(
            "bucket_size {bucket_size}, refill_rate {refill_rate}"
        ))
        .into());
    }

    let now_ms = current_timestamp_ms();
    // Long enough to survive a full drain-and-refill cycle of inactivity.
    // The ratio is caller-supplied and can exceed what a Duration holds.
    let ttl = Duration::try_from_secs_f64((bucket_size / refill_rate * 2.0).max(1.0)).map_err(
        |_| {
            ConfigError::InvalidAlgorithmParams(format!(
                "bucket_size {bucket_size} over refill_rate {refill_rate} has no representable refill period"
            ))
        },
    )?;

    let state = store
        .bucket_take(key, bucket_size, refill_rate, now_ms, ttl)
        .await?;

    let time_to_full_ms = ((bucket_size - state.tokens) / refill_rate * 1000.0).ceil() as u64;
    let reset = (now_ms + time_to_full_ms).div_ceil(1000);

    Ok(Decision::new(
        !state.taken,
        bucket_size as u64,
        state.tokens.floor() as u64,
        reset,
        now_ms / 1000,
    ))
}
