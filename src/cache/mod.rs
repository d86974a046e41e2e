//! # Local Call Caching
//!
//! In-process caching of call results across a chain of tiers.
//!
//! ## Architecture
//!
//! ```text
//! CallCache / CachedFn        <- fingerprint the call, consult the chain
//!   └── CacheChain            <- read-through, back-fill on deeper hits
//!         ├── FifoTier        <- size bound, evicts oldest insertion
//!         ├── LruTier         <- size bound, evicts least recently read
//!         └── TtlTier         <- age bound, lazy expiry + periodic sweep
//! ```
//!
//! Any type implementing [`CacheTier`] can be placed in a chain; the chain makes
//! no assumption about where a tier stores its data.
//!
//! Tiers are eventually consistent with one another. A key may briefly exist in
//! one tier and not another; a miss further down simply recomputes the value.

pub mod bounded;
pub mod call_cache;
pub mod chain;
pub mod tier;
pub mod ttl;

pub use bounded::{BoundedTier, EvictionPolicy, Fifo, FifoTier, Lru, LruTier};
pub use call_cache::{CachedFn, CallCache, CallCacheError};
pub use chain::{CacheChain, ChainHit};
pub use tier::{CacheEntry, CacheTier, TierStats};
pub use ttl::{TtlTier, TtlTierError, SWEEP_INTERVAL};

use crate::config::CacheSettings;
use std::sync::Arc;

/// The default chain built from `settings`: FIFO, then LRU, then TTL
pub fn default_chain<V: Clone + Send + Sync + 'static>(settings: &CacheSettings) -> CacheChain<V> {
    CacheChain::new(vec![
        Arc::new(FifoTier::<V>::new(settings.fifo_size)) as Arc<dyn CacheTier<V>>,
        Arc::new(LruTier::<V>::new(settings.lru_size)),
        Arc::new(TtlTier::<V>::new(settings.ttl())),
    ])
}
