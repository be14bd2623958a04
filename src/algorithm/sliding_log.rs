//! Sliding window log.

use std::time::Duration;

use crate::decision::Decision;
use crate::error::Result;
use crate::storage::{Store, current_timestamp_ms};

/// Exact counting over a trailing window of timestamped entries.
///
/// Each check trims entries older than `now - window`, appends the current
/// timestamp, and counts survivors in one atomic pipeline. Never admits
/// more than `limit` requests within any true window-length span.
pub(crate) async fn check<S: Store>(
    store: &S,
    key: &str,
    limit: u64,
    window: Duration,
) -> Result<Decision> {
    let now_ms = current_timestamp_ms();
    let window_ms = (window.as_millis() as u64).max(1);
    let cutoff_ms = now_ms.saturating_sub(window_ms);

    let count = store.log_append(key, now_ms, cutoff_ms, window).await?;

    // Newest entry is this one, so the log fully clears one window from now.
    let reset = (now_ms + window_ms).div_ceil(1000);
    Ok(Decision::new(
        count > limit,
        limit,
        limit.saturating_sub(count),
        reset,
        now_ms / 1000,
    ))
}
