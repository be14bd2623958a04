//! Fixed window counting.

use std::time::Duration;

use crate::algorithm::now_secs;
use crate::decision::Decision;
use crate::error::Result;
use crate::storage::Store;

/// Atomic increment on a key scoped to the current window floor.
///
/// The counter key carries the window floor, so a new window starts from a
/// fresh key and the old one expires on its own.
pub(crate) async fn check<S: Store>(
    store: &S,
    key: &str,
    limit: u64,
    window: Duration,
) -> Result<Decision> {
    let now = now_secs();
    let window_secs = window.as_secs().max(1);
    let floor = now / window_secs * window_secs;

    let bucket_key = format!("{key}:{floor}");
    let count = store.incr_window(&bucket_key, window).await?;

    let reset = floor + window_secs;
    Ok(Decision::new(
        count > limit,
        limit,
        limit.saturating_sub(count),
        reset,
        now,
    ))
}
