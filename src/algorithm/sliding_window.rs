//! Sliding window approximation.

use std::time::Duration;

use crate::decision::Decision;
use crate::error::Result;
use crate::storage::{Store, current_timestamp_ms};

/// Weighted blend of adjacent sub-windows.
///
/// The window is divided into `precision` sub-windows of equal width. The
/// current sub-window counts fully; trailing sub-windows count fully except
/// the oldest, which is weighted by how much of it still overlaps the
/// trailing window. `precision = 1` gives the classic two-window blend.
pub(crate) async fn check<S: Store>(
    store: &S,
    key: &str,
    limit: u64,
    window: Duration,
    precision: u32,
) -> Result<Decision> {
    let precision = precision.max(1) as u64;
    let now_ms = current_timestamp_ms();
    let window_ms = (window.as_millis() as u64).max(1);
    let width_ms = (window_ms / precision).max(1);
    let cur_floor = now_ms / width_ms * width_ms;

    // Sub-window counters must outlive the trailing window they contribute to.
    let ttl = Duration::from_millis(window_ms + width_ms);

    let current = store
        .incr_window(&format!("{key}:{cur_floor}"), ttl)
        .await?;

    let elapsed_fraction = (now_ms - cur_floor) as f64 / width_ms as f64;
    let mut weighted = current as f64;
    for i in 1..=precision {
        let floor = match cur_floor.checked_sub(i * width_ms) {
            Some(f) => f,
            None => break,
        };
        let count = store.read_count(&format!("{key}:{floor}")).await?;
        if count == 0 {
            continue;
        }
        let weight = if i == precision {
            1.0 - elapsed_fraction
        } else {
            1.0
        };
        weighted += count as f64 * weight;
    }

    let limited = weighted > limit as f64;
    let remaining = (limit as f64 - weighted).max(0.0).floor() as u64;
    // The state fully clears once the current sub-window exits the
    // trailing window.
    let reset = (cur_floor + width_ms + window_ms).div_ceil(1000);

    Ok(Decision::new(limited, limit, remaining, reset, now_ms / 1000))
}
