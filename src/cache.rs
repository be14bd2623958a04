//! Process-local negative-result cache.
//!
//! Memoizes recent rejections so tight repeated-call bursts against an
//! already-rejected identifier skip the store round-trip. Entries are keyed
//! by store key plus the applied limit and window, so any policy change
//! invalidates prior entries implicitly. Disabled unless a call opts in.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::decision::Decision;
use crate::identifier::AppliedPolicy;
use crate::storage::current_timestamp_ms;

/// Cache key: identical policy must build both the store key and this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    store_key: String,
    limit: u64,
    window_ms: u64,
}

impl CacheKey {
    pub(crate) fn new(store_key: &str, policy: &AppliedPolicy) -> Self {
        Self {
            store_key: store_key.to_string(),
            limit: policy.limit,
            window_ms: policy.window.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    decision: Decision,
    observed_at_ms: u64,
    ttl_ms: u64,
}

/// Short-TTL memo of rejections with a background sweep.
///
/// The sweeper is an owned resource: constructed with a configurable
/// interval, stoppable via [`DecisionCache::stop`], and shut down when the
/// cache is dropped.
pub(crate) struct DecisionCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl DecisionCache {
    /// Create a cache sweeping at the given interval.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn new(sweep_interval: Duration) -> Self {
        let entries: Arc<DashMap<CacheKey, CacheEntry>> = Arc::new(DashMap::new());
        let shutdown = Arc::new(Notify::new());

        let sweep_entries = entries.clone();
        let sweep_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = current_timestamp_ms();
                        sweep_entries.retain(|_, entry| {
                            let aged_out = now_ms.saturating_sub(entry.observed_at_ms) > entry.ttl_ms;
                            let reset_passed = now_ms / 1000 > entry.decision.reset;
                            !(aged_out && reset_passed)
                        });
                    }
                    _ = sweep_shutdown.notified() => break,
                }
            }
        });

        Self {
            entries,
            sweeper: Mutex::new(Some(handle)),
            shutdown,
        }
    }

    /// Return a cached rejection still within `ttl` and before its reset.
    pub(crate) fn lookup(&self, key: &CacheKey, ttl: Duration) -> Option<Decision> {
        let now_ms = current_timestamp_ms();
        let entry = self.entries.get(key)?;

        let fresh = now_ms.saturating_sub(entry.observed_at_ms) <= ttl.as_millis() as u64;
        let live = now_ms / 1000 <= entry.decision.reset;
        if fresh && live {
            return Some(entry.decision.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    /// Memoize a rejection. Allowed decisions are never cached.
    pub(crate) fn record(&self, key: CacheKey, decision: Decision, ttl: Duration) {
        if !decision.limited {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                decision,
                observed_at_ms: current_timestamp_ms(),
                ttl_ms: ttl.as_millis() as u64,
            },
        );
    }

    /// Stop the background sweeper. Idempotent.
    pub(crate) fn stop(&self) {
        // notify_one stores a permit, so the signal survives a sweeper that
        // is mid-sweep rather than parked on notified().
        self.shutdown.notify_one();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn entries_weak(&self) -> std::sync::Weak<DashMap<CacheKey, CacheEntry>> {
        Arc::downgrade(&self.entries)
    }
}

impl Drop for DecisionCache {
    fn drop(&mut self) {
        self.stop();
    }
}
