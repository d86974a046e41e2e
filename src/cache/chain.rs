//! Federated read-through chain of cache tiers.

use super::tier::CacheTier;
use crate::fingerprint::CacheKey;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of a chain lookup that found a value
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHit<V> {
    pub value: V,
    /// Index of the tier that answered
    pub tier_index: usize,
}

/// Ordered tiers consulted front to back
///
/// A chain is built once and shared by every caller of the operation it serves;
/// cloning is cheap and clones see the same tiers. An empty chain is valid and
/// misses on every lookup.
pub struct CacheChain<V> {
    tiers: Arc<Vec<Arc<dyn CacheTier<V>>>>,
}

impl<V> Clone for CacheChain<V> {
    fn clone(&self) -> Self {
        Self {
            tiers: Arc::clone(&self.tiers),
        }
    }
}

impl<V> fmt::Debug for CacheChain<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheChain")
            .field("tiers", &self.tier_names())
            .finish()
    }
}

impl<V> CacheChain<V> {
    pub fn new(tiers: Vec<Arc<dyn CacheTier<V>>>) -> Self {
        Self {
            tiers: Arc::new(tiers),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tier(&self, index: usize) -> Option<&Arc<dyn CacheTier<V>>> {
        self.tiers.get(index)
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }
}

impl<V: Clone> CacheChain<V> {
    /// Find `key` in the first tier that holds it
    ///
    /// On a hit at index `i > 0` every tier in `[0, i)` is back-filled with its
    /// own copy of the value, so the faster tiers answer next time.
    pub fn lookup(&self, key: &CacheKey) -> Option<ChainHit<V>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(key) {
                debug!(
                    key = %key.short(),
                    tier = %tier.name(),
                    level = index + 1,
                    "Cache hit"
                );
                if index > 0 {
                    self.backfill(key, &value, index);
                }
                return Some(ChainHit {
                    value,
                    tier_index: index,
                });
            }
        }
        debug!(key = %key.short(), tiers = self.tiers.len(), "Cache miss");
        None
    }

    /// Write `value` into every tier from `from_index` to the end
    pub fn populate(&self, key: &CacheKey, value: &V, from_index: usize) {
        for tier in self.tiers.iter().skip(from_index) {
            tier.put(*key, value.clone());
        }
    }

    fn backfill(&self, key: &CacheKey, value: &V, hit_index: usize) {
        for tier in &self.tiers[..hit_index] {
            tier.put(*key, value.clone());
        }
    }

    pub fn purge(&self) {
        for tier in self.tiers.iter() {
            tier.purge();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FifoTier, LruTier, TtlTier};
    use std::time::Duration;

    fn key(n: u32) -> CacheKey {
        CacheKey::digest(&n.to_le_bytes())
    }

    #[test]
    fn test_lookup_backfills_earlier_tiers() {
        let t0: Arc<dyn CacheTier<String>> = Arc::new(FifoTier::<String>::new(10));
        let t1: Arc<dyn CacheTier<String>> = Arc::new(LruTier::<String>::new(10));
        let t2: Arc<dyn CacheTier<String>> = Arc::new(TtlTier::<String>::new(Duration::from_secs(60)));
        let chain = CacheChain::new(vec![t0.clone(), t1.clone(), t2.clone()]);

        t2.put(key(1), "deep".to_string());

        let hit = chain.lookup(&key(1)).unwrap();
        assert_eq!(hit.value, "deep");
        assert_eq!(hit.tier_index, 2);
        assert!(t0.contains(&key(1)));
        assert!(t1.contains(&key(1)));

        let hit = chain.lookup(&key(1)).unwrap();
        assert_eq!(hit.tier_index, 0);
    }

    #[test]
    fn test_backfill_stops_at_hit_tier() {
        let t0: Arc<dyn CacheTier<u32>> = Arc::new(FifoTier::<u32>::new(10));
        let t1: Arc<dyn CacheTier<u32>> = Arc::new(FifoTier::<u32>::new(10));
        let t2: Arc<dyn CacheTier<u32>> = Arc::new(FifoTier::<u32>::new(10));
        let chain = CacheChain::new(vec![t0.clone(), t1.clone(), t2.clone()]);

        t1.put(key(7), 7);
        assert_eq!(chain.lookup(&key(7)).map(|hit| hit.tier_index), Some(1));
        assert!(t0.contains(&key(7)));
        assert!(!t2.contains(&key(7)));
    }

    #[test]
    fn test_populate_writes_all_tiers() {
        let t0: Arc<dyn CacheTier<u32>> = Arc::new(FifoTier::<u32>::new(10));
        let t1: Arc<dyn CacheTier<u32>> = Arc::new(LruTier::<u32>::new(10));
        let chain = CacheChain::new(vec![t0.clone(), t1.clone()]);

        chain.populate(&key(3), &3, 0);
        assert!(t0.contains(&key(3)));
        assert!(t1.contains(&key(3)));

        chain.populate(&key(4), &4, 1);
        assert!(!t0.contains(&key(4)));
        assert!(t1.contains(&key(4)));
    }

    #[test]
    fn test_empty_chain_always_misses() {
        let chain: CacheChain<u32> = CacheChain::empty();
        chain.populate(&key(1), &1, 0);
        assert!(chain.lookup(&key(1)).is_none());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_clones_share_tiers() {
        let chain: CacheChain<u32> = CacheChain::new(vec![Arc::new(LruTier::<u32>::new(4))]);
        let clone = chain.clone();
        chain.populate(&key(9), &9, 0);
        assert_eq!(clone.lookup(&key(9)).map(|hit| hit.value), Some(9));
        assert_eq!(clone.tier_names(), vec!["LruTier size 4".to_string()]);
    }
}
