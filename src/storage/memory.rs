//! In-memory store backend.
//!
//! Single-process stand-in for the shared store, used in tests and
//! single-instance deployments. `DashMap`'s entry API gives per-key
//! atomicity for every read-modify-write; a background task sweeps expired
//! slots so idle identifiers do not accumulate.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::storage::{BucketState, Store, current_timestamp_ms};

/// Garbage collection configuration for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Sweep interval; `None` disables the background task and relies on
    /// lazy expiry alone.
    pub interval: Option<Duration>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(60)),
        }
    }
}

impl GcConfig {
    /// Sweep at the given interval.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
        }
    }

    /// Lazy expiry only.
    pub fn disabled() -> Self {
        Self { interval: None }
    }
}

#[derive(Debug, Clone)]
enum SlotState {
    Counter(u64),
    Log(Vec<u64>),
    Bucket { tokens: f64, updated_ms: u64 },
}

#[derive(Debug, Clone)]
struct Slot {
    state: SlotState,
    expires_at: u64,
}

/// In-memory store with lazy expiry and background garbage collection.
pub struct MemoryStore {
    data: Arc<DashMap<String, Slot>>,
    shutdown: Arc<Notify>,
    gc: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.data.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store with the default GC interval.
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a store with a custom GC configuration.
    pub fn with_gc(config: GcConfig) -> Self {
        let mut store = Self {
            data: Arc::new(DashMap::new()),
            shutdown: Arc::new(Notify::new()),
            gc: None,
        };

        if let Some(interval) = config.interval {
            let data = store.data.clone();
            let shutdown = store.shutdown.clone();
            store.gc = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            let now = current_timestamp_ms();
                            data.retain(|_, slot| slot.expires_at > now);
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            }));
        }

        store
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no slots.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[cfg(test)]
    fn data_weak(&self) -> std::sync::Weak<DashMap<String, Slot>> {
        Arc::downgrade(&self.data)
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        // notify_one stores a permit, so the signal is not lost if the GC
        // task is mid-sweep rather than parked on notified().
        self.shutdown.notify_one();
        if let Some(gc) = &self.gc {
            gc.abort();
        }
    }
}

impl Store for MemoryStore {
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = current_timestamp_ms();
        let expires_at = now + ttl.as_millis() as u64;

        let mut slot = self.data.entry(key.to_string()).or_insert_with(|| Slot {
            state: SlotState::Counter(0),
            expires_at,
        });
        if slot.expires_at <= now || !matches!(slot.state, SlotState::Counter(_)) {
            slot.state = SlotState::Counter(0);
        }
        slot.expires_at = expires_at;
        let SlotState::Counter(count) = &mut slot.state else {
            unreachable!()
        };
        *count += 1;
        Ok(*count)
    }

    async fn read_count(&self, key: &str) -> Result<u64> {
        let now = current_timestamp_ms();
        match self.data.get(key) {
            Some(slot) if slot.expires_at > now => match slot.state {
                SlotState::Counter(count) => Ok(count),
                _ => Ok(0),
            },
            _ => Ok(0),
        }
    }

    async fn log_append(
        &self,
        key: &str,
        member_ms: u64,
        cutoff_ms: u64,
        ttl: Duration,
    ) -> Result<u64> {
        let now = current_timestamp_ms();
        let expires_at = now + ttl.as_millis() as u64;

        let mut slot = self.data.entry(key.to_string()).or_insert_with(|| Slot {
            state: SlotState::Log(Vec::new()),
            expires_at,
        });
        if slot.expires_at <= now || !matches!(slot.state, SlotState::Log(_)) {
            slot.state = SlotState::Log(Vec::new());
        }
        slot.expires_at = expires_at;
        let SlotState::Log(entries) = &mut slot.state else {
            unreachable!()
        };
        entries.retain(|&ts| ts >= cutoff_ms);
        entries.push(member_ms);
        Ok(entries.len() as u64)
    }

    async fn bucket_take(
        &self,
        key: &str,
        bucket_size: f64,
        refill_rate: f64,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<BucketState> {
        let wall_now = current_timestamp_ms();
        let expires_at = wall_now + ttl.as_millis() as u64;

        let mut slot = self.data.entry(key.to_string()).or_insert_with(|| Slot {
            state: SlotState::Bucket {
                tokens: bucket_size,
                updated_ms: now_ms,
            },
            expires_at,
        });
        if slot.expires_at <= wall_now || !matches!(slot.state, SlotState::Bucket { .. }) {
            slot.state = SlotState::Bucket {
                tokens: bucket_size,
                updated_ms: now_ms,
            };
        }
        slot.expires_at = expires_at;
        let SlotState::Bucket { tokens, updated_ms } = &mut slot.state else {
            unreachable!()
        };

        if now_ms > *updated_ms {
            let elapsed_secs = (now_ms - *updated_ms) as f64 / 1000.0;
            *tokens = (*tokens + elapsed_secs * refill_rate).min(bucket_size);
            *updated_ms = now_ms;
        }

        let taken = *tokens >= 1.0;
        if taken {
            *tokens -= 1.0;
        }
        Ok(BucketState {
            taken,
            tokens: *tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_window_counts_up() {
        let store = MemoryStore::with_gc(GcConfig::disabled());
        assert_eq!(store.incr_window("k", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(store.incr_window("k", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.read_count("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_counter_restarts() {
        let store = MemoryStore::with_gc(GcConfig::disabled());
        store.incr_window("k", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.read_count("k").await.unwrap(), 0);
        assert_eq!(store.incr_window("k", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_log_append_trims_old_entries() {
        let store = MemoryStore::with_gc(GcConfig::disabled());
        let ttl = Duration::from_secs(60);

        assert_eq!(store.log_append("k", 1_000, 0, ttl).await.unwrap(), 1);
        assert_eq!(store.log_append("k", 2_000, 0, ttl).await.unwrap(), 2);
        // Cutoff past the first entry drops it.
        assert_eq!(store.log_append("k", 3_000, 1_500, ttl).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bucket_take_refills_and_caps() {
        let store = MemoryStore::with_gc(GcConfig::disabled());
        let ttl = Duration::from_secs(60);

        // Drain a 2-token bucket.
        let s = store.bucket_take("k", 2.0, 1.0, 10_000, ttl).await.unwrap();
        assert!(s.taken);
        let s = store.bucket_take("k", 2.0, 1.0, 10_000, ttl).await.unwrap();
        assert!(s.taken);
        let s = store.bucket_take("k", 2.0, 1.0, 10_000, ttl).await.unwrap();
        assert!(!s.taken);

        // 10 elapsed seconds refill to the cap, not beyond.
        let s = store.bucket_take("k", 2.0, 1.0, 20_000, ttl).await.unwrap();
        assert!(s.taken);
        assert!((s.tokens - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gc_sweeps_expired_slots() {
        let store = MemoryStore::with_gc(GcConfig::every(Duration::from_millis(20)));
        store.incr_window("k", Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_drop_stops_gc_task() {
        let store = MemoryStore::with_gc(GcConfig::every(Duration::from_millis(10)));
        let data = store.data_weak();

        drop(store);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The GC task held the only other reference to the map.
        assert!(data.upgrade().is_none());
    }
}
