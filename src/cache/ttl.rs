//! Time-bounded tier.
//!
//! Entries live for at most `timeout`. Lookups check the entry age, so an expired
//! entry is never returned even if it is still stored. Expired entries are swept
//! in one batch on every [`SWEEP_INTERVAL`]th write to this tier.

use super::tier::{CacheTier, OrderedStore, TierCounters, TierStats};
use crate::fingerprint::CacheKey;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Number of writes between two expiry sweeps (counted per tier instance)
pub const SWEEP_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TtlTierError {
    #[error("Refresh threshold must be between 0 and 1 (exclusive), got {0}")]
    InvalidRefreshThreshold(f64),
}

/// Unbounded tier whose entries expire after a fixed timeout
#[derive(Debug)]
pub struct TtlTier<V> {
    timeout: Duration,
    refresh_threshold: Option<f64>,
    store: Mutex<OrderedStore<V>>,
    writes: AtomicU64,
    counters: TierCounters,
}

impl<V> TtlTier<V> {
    pub fn new(timeout: Duration) -> Self {
        debug!(timeout_ms = timeout.as_millis() as u64, "Initializing TtlTier");
        Self {
            timeout,
            refresh_threshold: None,
            store: Mutex::new(OrderedStore::new()),
            writes: AtomicU64::new(0),
            counters: TierCounters::default(),
        }
    }

    /// A tier that also reports when an entry is due for refresh
    ///
    /// `threshold` is the fraction of the timeout after which
    /// [`TtlTier::get_with_refresh_hint`] flags an entry.
    pub fn with_refresh_threshold(timeout: Duration, threshold: f64) -> Result<Self, TtlTierError> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(TtlTierError::InvalidRefreshThreshold(threshold));
        }
        let mut tier = Self::new(timeout);
        tier.refresh_threshold = Some(threshold);
        Ok(tier)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Remove expired entries, oldest first
    ///
    /// All entries share one timeout and the store is in insertion order, so the
    /// sweep stops at the first entry that is still alive.
    pub fn sweep(&self) -> u64 {
        let mut store = self.store.lock();
        let mut removed = 0;
        loop {
            let expired = store
                .front()
                .is_some_and(|entry| entry.age() > self.timeout);
            if !expired {
                break;
            }
            store.pop_front();
            removed += 1;
        }
        drop(store);

        if removed > 0 {
            self.counters.evicted(removed);
        }
        debug!(
            removed = removed,
            timeout_ms = self.timeout.as_millis() as u64,
            "TtlTier sweep finished"
        );
        removed
    }
}

impl<V: Clone> TtlTier<V> {
    /// Look up a value and whether it has passed the refresh threshold
    ///
    /// Without a configured threshold the hint is always `false`.
    pub fn get_with_refresh_hint(&self, key: &CacheKey) -> Option<(V, bool)> {
        let mut store = self.store.lock();
        let expired = match store.get(key) {
            Some(entry) => entry.age() > self.timeout,
            None => {
                self.counters.miss();
                return None;
            }
        };
        if expired {
            store.remove(key);
            self.counters.miss();
            self.counters.evicted(1);
            return None;
        }

        let entry = store.mark_read(key)?;
        self.counters.hit();
        let refresh = self
            .refresh_threshold
            .map(|threshold| entry.age() >= self.timeout.mul_f64(threshold))
            .unwrap_or(false);
        Some((entry.value.clone(), refresh))
    }
}

impl<V: Clone + Send + Sync> CacheTier<V> for TtlTier<V> {
    fn name(&self) -> String {
        match self.refresh_threshold {
            Some(threshold) => format!(
                "TtlTier timeout {:?} threshold {:.2}",
                self.timeout, threshold
            ),
            None => format!("TtlTier timeout {:?}", self.timeout),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<V> {
        self.get_with_refresh_hint(key).map(|(value, _)| value)
    }

    fn put(&self, key: CacheKey, value: V) {
        self.store.lock().insert(key, value);

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            self.sweep();
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.store
            .lock()
            .get(key)
            .is_some_and(|entry| entry.age() <= self.timeout)
    }

    fn delete(&self, key: &CacheKey) -> bool {
        self.store.lock().remove(key).is_some()
    }

    fn purge(&self) {
        debug!(tier = %self.name(), "Purging cache tier");
        self.store.lock().clear();
    }

    /// Stored entries, including expired ones not yet swept
    fn len(&self) -> usize {
        self.store.lock().len()
    }

    fn stats(&self) -> TierStats {
        let entries = self.len();
        self.counters.snapshot(entries)
    }
}
