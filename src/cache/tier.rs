//! Cache tier contract and the bookkeeping shared by the local tiers.

use crate::fingerprint::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A single local cache store with its own eviction policy
///
/// Implementations must be internally synchronized: `get`, `put` and `contains`
/// are called concurrently from many call sites. Concurrent puts of the same key
/// race and the last writer wins.
pub trait CacheTier<V>: Send + Sync {
    /// Human-readable description, e.g. `LruTier size 100`
    fn name(&self) -> String;

    /// Look up a value. Policies that track recency update it here.
    fn get(&self, key: &CacheKey) -> Option<V>;

    /// Store a value, enforcing the eviction policy before returning
    fn put(&self, key: CacheKey, value: V);

    /// Whether a live entry exists, without touching recency
    fn contains(&self, key: &CacheKey) -> bool;

    /// Remove an entry, returning whether it was present
    fn delete(&self, key: &CacheKey) -> bool;

    /// Drop every entry
    fn purge(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> TierStats;
}

/// Point-in-time counters for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

/// Lock-free hit/miss/eviction counters
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TierCounters {
    #[inline]
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// A cached value plus the timestamps eviction policies look at
///
/// Each tier owns its entries; back-filling another tier stores a fresh copy.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub value: V,
    pub inserted_at: Instant,
    pub last_access: Instant,
    order: u64,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_access.elapsed()
    }
}

/// Entries indexed by key plus a position in a single ordering
///
/// The ordering is insertion order unless the owner calls [`OrderedStore::touch`],
/// which moves an entry to the back. Either way the front is the eviction
/// candidate, so FIFO, LRU and TTL sweeps all pop from the front.
#[derive(Debug)]
pub(crate) struct OrderedStore<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    order: BTreeMap<u64, CacheKey>,
    next_order: u64,
}

impl<V> OrderedStore<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_order: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Insert or overwrite; an overwrite counts as a fresh insertion
    pub(crate) fn insert(&mut self, key: CacheKey, value: V) {
        let order = self.bump();
        let now = Instant::now();
        let entry = CacheEntry {
            key,
            value,
            inserted_at: now,
            last_access: now,
            order,
        };
        if let Some(previous) = self.entries.insert(key, entry) {
            self.order.remove(&previous.order);
        }
        self.order.insert(order, key);
    }

    /// Mark an entry as just read and move it to the back of the ordering
    pub(crate) fn touch(&mut self, key: &CacheKey) -> Option<&CacheEntry<V>> {
        let order = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.order);
        entry.order = order;
        entry.last_access = Instant::now();
        self.order.insert(order, *key);
        Some(entry)
    }

    /// Update last-access time without moving the entry
    pub(crate) fn mark_read(&mut self, key: &CacheKey) -> Option<&CacheEntry<V>> {
        let entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(entry)
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.order);
        Some(entry)
    }

    pub(crate) fn front(&self) -> Option<&CacheEntry<V>> {
        let (_, key) = self.order.first_key_value()?;
        self.entries.get(key)
    }

    pub(crate) fn pop_front(&mut self) -> Option<CacheEntry<V>> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key)
    }

    /// Pop from the front until at most `capacity` entries remain
    pub(crate) fn shrink_to(&mut self, capacity: usize) -> u64 {
        let mut evicted = 0;
        while self.entries.len() > capacity {
            if self.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
