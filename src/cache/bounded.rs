//! Size-bounded tiers: FIFO and LRU.
//!
//! Both keep at most `capacity` entries. They differ only in which entry is
//! dropped on overflow: FIFO drops the oldest insertion no matter how often it is
//! read, LRU drops the entry whose last read lies furthest back. The difference
//! is one [`EvictionPolicy`] type parameter on [`BoundedTier`].

use super::tier::{CacheTier, OrderedStore, TierCounters, TierStats};
use crate::fingerprint::CacheKey;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Decides how reads affect the eviction order of a [`BoundedTier`]
pub trait EvictionPolicy: fmt::Debug + Send + Sync + 'static {
    /// Prefix of the tier's descriptive name
    const NAME: &'static str;

    /// Whether a read moves the entry to the back of the eviction order
    const REFRESH_ON_READ: bool;
}

/// Evict by insertion order
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl EvictionPolicy for Fifo {
    const NAME: &'static str = "FifoTier";
    const REFRESH_ON_READ: bool = false;
}

/// Evict the least recently read entry
#[derive(Debug, Clone, Copy, Default)]
pub struct Lru;

impl EvictionPolicy for Lru {
    const NAME: &'static str = "LruTier";
    const REFRESH_ON_READ: bool = true;
}

/// Bounded tier evicting by insertion order
pub type FifoTier<V> = BoundedTier<V, Fifo>;

/// Bounded tier evicting the least recently read entry
pub type LruTier<V> = BoundedTier<V, Lru>;

/// Tier holding at most `capacity` entries, evicting per `P`
#[derive(Debug)]
pub struct BoundedTier<V, P> {
    capacity: usize,
    store: Mutex<OrderedStore<V>>,
    counters: TierCounters,
    policy: PhantomData<P>,
}

impl<V, P: EvictionPolicy> BoundedTier<V, P> {
    /// A capacity of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!(tier = P::NAME, "Tier capacity of 0 requested, using 1");
            1
        } else {
            capacity
        };
        debug!(tier = P::NAME, capacity = capacity, "Initializing bounded tier");
        Self {
            capacity,
            store: Mutex::new(OrderedStore::new()),
            counters: TierCounters::default(),
            policy: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<V: Clone + Send + Sync, P: EvictionPolicy> CacheTier<V> for BoundedTier<V, P> {
    fn name(&self) -> String {
        format!("{} size {}", P::NAME, self.capacity)
    }

    fn get(&self, key: &CacheKey) -> Option<V> {
        let mut store = self.store.lock();
        let entry = if P::REFRESH_ON_READ {
            store.touch(key)
        } else {
            store.mark_read(key)
        };
        match entry {
            Some(entry) => {
                self.counters.hit();
                Some(entry.value.clone())
            }
            None => {
                self.counters.miss();
                None
            }
        }
    }

    fn put(&self, key: CacheKey, value: V) {
        let mut store = self.store.lock();
        store.insert(key, value);
        let evicted = store.shrink_to(self.capacity);
        if evicted > 0 {
            self.counters.evicted(evicted);
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.store.lock().get(key).is_some()
    }

    fn delete(&self, key: &CacheKey) -> bool {
        self.store.lock().remove(key).is_some()
    }

    fn purge(&self) {
        debug!(tier = %self.name(), "Purging cache tier");
        self.store.lock().clear();
    }

    fn len(&self) -> usize {
        self.store.lock().len()
    }

    fn stats(&self) -> TierStats {
        let entries = self.len();
        self.counters.snapshot(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(n: u32) -> CacheKey {
        CacheKey::digest(&n.to_le_bytes())
    }

    #[test]
    fn test_fifo_evicts_first_inserted_regardless_of_reads() {
        let tier = FifoTier::new(3);
        for n in 0..3 {
            tier.put(key(n), n);
        }
        // Reads do not protect an entry from FIFO eviction
        assert_eq!(tier.get(&key(0)), Some(0));
        assert_eq!(tier.get(&key(0)), Some(0));

        tier.put(key(3), 3);

        assert_eq!(tier.len(), 3);
        assert!(!tier.contains(&key(0)));
        for n in 1..=3 {
            assert!(tier.contains(&key(n)));
        }
        assert_eq!(tier.stats().evictions, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_read() {
        let tier = LruTier::new(3);
        for n in 0..3 {
            tier.put(key(n), n);
        }
        assert_eq!(tier.get(&key(0)), Some(0));

        tier.put(key(3), 3);

        assert!(tier.contains(&key(0)));
        assert!(!tier.contains(&key(1)));
        assert!(tier.contains(&key(2)));
        assert!(tier.contains(&key(3)));
    }

    #[test]
    fn test_lru_contains_does_not_refresh_recency() {
        let tier = LruTier::new(2);
        tier.put(key(0), 0);
        tier.put(key(1), 1);
        assert!(tier.contains(&key(0)));

        tier.put(key(2), 2);
        assert!(!tier.contains(&key(0)));
    }

    #[test]
    fn test_overwrite_keeps_size_and_updates_value() {
        let tier = LruTier::new(2);
        tier.put(key(0), "old");
        tier.put(key(0), "new");
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get(&key(0)), Some("new"));
    }

    #[test]
    fn test_delete_purge_and_stats() {
        let tier = FifoTier::new(10);
        tier.put(key(1), 1);
        tier.put(key(2), 2);

        assert!(tier.delete(&key(1)));
        assert!(!tier.delete(&key(1)));
        assert_eq!(tier.get(&key(1)), None);
        assert_eq!(tier.get(&key(2)), Some(2));

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);

        tier.purge();
        assert!(tier.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let tier: LruTier<u8> = LruTier::new(0);
        assert_eq!(tier.capacity(), 1);
        assert_eq!(tier.name(), "LruTier size 1");

        let tier: FifoTier<u8> = FifoTier::new(0);
        assert_eq!(tier.name(), "FifoTier size 1");
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let tier = Arc::new(LruTier::new(50));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for n in 0..200u32 {
                        tier.put(key(t * 1000 + n), n);
                        let _ = tier.get(&key(t * 1000 + n / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tier.len(), 50);
    }
}
