//! # Call Cache Wrapper
//!
//! Memoizes an operation's results in a [`CacheChain`], keyed by the call's
//! fingerprint. On a hit the operation is skipped entirely, including any side
//! effects such as outbound requests. Failed calls are never stored.
//!
//! ```rust
//! use callguard::cache::{CacheChain, CacheTier, CallCache, CachedFn, FifoTier};
//! use callguard::fingerprint::OperationIdentity;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tiers: Vec<Arc<dyn CacheTier<u64>>> = vec![Arc::new(FifoTier::<u64>::new(100))];
//! let cache = CallCache::new(OperationIdentity::function("math::double"), CacheChain::new(tiers));
//! let double = CachedFn::new(cache, |(n,): (u64,)| async move { Ok::<_, std::io::Error>(n * 2) });
//!
//! assert_eq!(double.call((21,)).await?, 42);
//! assert_eq!(double.call((21,)).await?, 42); // served from the FifoTier
//! # Ok(())
//! # }
//! ```

use super::chain::CacheChain;
use crate::config::CacheSettings;
use crate::fingerprint::{
    CallArgs, FingerprintError, Fingerprinter, IntoCallArgs, OperationIdentity,
};
use crate::telemetry::{NoopTracer, Tracer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors surfaced by a cached call
#[derive(Debug, thiserror::Error)]
pub enum CallCacheError<E> {
    /// The arguments could not be fingerprinted; nothing was cached or called
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    /// The wrapped operation failed; the failure was not cached
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> CallCacheError<E> {
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CallCacheError::Operation(e) => Some(e),
            CallCacheError::Fingerprint(_) => None,
        }
    }
}

/// Memoizing wrapper around one operation
///
/// Build it once next to the operation and share it; a wrapper created per call
/// would start with an empty chain every time.
pub struct CallCache<V> {
    identity: OperationIdentity,
    chain: CacheChain<V>,
    fingerprinter: Fingerprinter,
    ignore_first_argument: bool,
    enabled: bool,
    tracer: Arc<dyn Tracer>,
}

impl<V> fmt::Debug for CallCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCache")
            .field("identity", &self.identity)
            .field("chain", &self.chain)
            .field("ignore_first_argument", &self.ignore_first_argument)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<V: Clone> CallCache<V> {
    pub fn new(identity: OperationIdentity, chain: CacheChain<V>) -> Self {
        if chain.is_empty() {
            warn!(operation = %identity, "CallCache created with an empty chain, every call will miss");
        }
        debug!(
            operation = %identity,
            tiers = ?chain.tier_names(),
            "Initializing CallCache"
        );
        Self {
            identity,
            chain,
            fingerprinter: Fingerprinter::default(),
            ignore_first_argument: false,
            enabled: true,
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Wrapper configured from the cache settings (key prefix and kill-switch)
    pub fn from_settings(
        identity: OperationIdentity,
        chain: CacheChain<V>,
        settings: &CacheSettings,
    ) -> Self {
        Self::new(identity, chain)
            .with_fingerprinter(Fingerprinter::new(settings.key_prefix.clone()))
            .enabled(settings.enabled)
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Leave the first positional argument (a method receiver) out of the key
    pub fn ignore_first_argument(mut self, ignore: bool) -> Self {
        self.ignore_first_argument = ignore;
        self
    }

    /// With caching disabled every call goes straight to the operation
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn identity(&self) -> &OperationIdentity {
        &self.identity
    }

    pub fn chain(&self) -> &CacheChain<V> {
        &self.chain
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached result for `args`, or run `operation` and cache its result
    pub async fn call<F, Fut, E>(&self, args: &CallArgs, operation: F) -> Result<V, CallCacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !self.enabled {
            return operation().await.map_err(CallCacheError::Operation);
        }

        let mut span = self
            .tracer
            .start_span(&format!("cached call: {}", self.identity));

        let key = self
            .fingerprinter
            .fingerprint(&self.identity, args, self.ignore_first_argument);

        if let Some(hit) = self.chain.lookup(&key) {
            let level = hit.tier_index + 1;
            let tier_name = self
                .chain
                .tier(hit.tier_index)
                .map(|tier| tier.name())
                .unwrap_or_default();
            let name = format!("{} (hit L{level})", span.operation_name());
            span.set_operation_name(&name);
            span.set_tag("cache.hit", tier_name.into());
            span.set_tag("cache.level", format!("L{level}").into());
            return Ok(hit.value);
        }

        debug!(operation = %self.identity, key = %key.short(), "Cache miss, calling operation");
        let name = format!("{} (miss)", span.operation_name());
        span.set_operation_name(&name);
        span.set_tag("cache.miss", true.into());

        match operation().await {
            Ok(value) => {
                self.chain.populate(&key, &value, 0);
                Ok(value)
            }
            Err(e) => {
                span.log_kv("error", "operation failed, result not cached");
                Err(CallCacheError::Operation(e))
            }
        }
    }
}

/// A [`CallCache`] bound to its target, called with a typed argument tuple
pub struct CachedFn<F, V> {
    cache: CallCache<V>,
    target: F,
}

impl<F, V: Clone> CachedFn<F, V> {
    pub fn new(cache: CallCache<V>, target: F) -> Self {
        Self { cache, target }
    }

    pub fn cache(&self) -> &CallCache<V> {
        &self.cache
    }

    pub async fn call<A, Fut, E>(&self, args: A) -> Result<V, CallCacheError<E>>
    where
        A: IntoCallArgs,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !self.cache.is_enabled() {
            return (self.target)(args).await.map_err(CallCacheError::Operation);
        }
        let call_args = args.to_call_args()?;
        self.cache.call(&call_args, move || (self.target)(args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, FifoTier, LruTier};
    use crate::telemetry::{RecordingTracer, TagValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain<V: Clone + Send + Sync + 'static>(tiers: Vec<Arc<dyn CacheTier<V>>>) -> CacheChain<V> {
        CacheChain::new(tiers)
    }

    #[tokio::test]
    async fn test_hit_skips_operation() {
        let cache = CallCache::new(
            OperationIdentity::function("tests::square"),
            chain::<u64>(vec![Arc::new(LruTier::<u64>::new(10))]),
        );
        let calls = AtomicUsize::new(0);
        let args = CallArgs::new().arg(&4u64).unwrap();

        for _ in 0..3 {
            let value = cache
                .call(&args, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(16)
                })
                .await
                .unwrap();
            assert_eq!(value, 16);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = CallCache::new(
            OperationIdentity::function("tests::flaky"),
            chain::<u64>(vec![Arc::new(FifoTier::<u64>::new(10))]),
        );
        let calls = AtomicUsize::new(0);
        let args = CallArgs::new();

        let first = cache
            .call(&args, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u64, _>("unavailable")
            })
            .await;
        assert!(matches!(first, Err(CallCacheError::Operation("unavailable"))));

        let second = cache
            .call(&args, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(7)
            })
            .await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_calls_through() {
        let tier: Arc<LruTier<u8>> = Arc::new(LruTier::new(10));
        let cache = CallCache::new(
            OperationIdentity::function("tests::disabled"),
            chain::<u8>(vec![tier.clone() as Arc<dyn CacheTier<u8>>]),
        )
        .enabled(false);
        let args = CallArgs::new();

        for _ in 0..2 {
            cache.call(&args, || async { Ok::<_, String>(1) }).await.unwrap();
        }
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_ignore_first_argument_shares_entries() {
        let cache = CallCache::new(
            OperationIdentity::method("tests::Client", "get"),
            chain::<String>(vec![Arc::new(LruTier::<String>::new(10))]),
        )
        .ignore_first_argument(true);
        let calls = AtomicUsize::new(0);

        for receiver in ["client-a", "client-b"] {
            let args = CallArgs::new().arg(&receiver).unwrap().arg(&"/path").unwrap();
            cache
                .call(&args, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("body".to_string())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_span_tags_for_hit_and_miss() {
        let tracer = RecordingTracer::new();
        let deep: Arc<dyn CacheTier<u8>> = Arc::new(LruTier::<u8>::new(10));
        let cache = CallCache::new(
            OperationIdentity::function("tests::traced"),
            chain::<u8>(vec![Arc::new(FifoTier::<u8>::new(10)), deep.clone()]),
        )
        .with_tracer(Arc::new(tracer.clone()));
        let args = CallArgs::new().arg(&1u8).unwrap();

        cache.call(&args, || async { Ok::<_, String>(1) }).await.unwrap();
        cache.chain().tier(0).unwrap().purge();
        cache.call(&args, || async { Ok::<_, String>(1) }).await.unwrap();

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].operation_name, "cached call: tests::traced (miss)");
        assert_eq!(spans[0].tag("cache.miss"), Some(&TagValue::Bool(true)));
        assert_eq!(spans[1].operation_name, "cached call: tests::traced (hit L2)");
        assert_eq!(
            spans[1].tag("cache.hit"),
            Some(&TagValue::Str("LruTier size 10".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cached_fn_reports_unserializable_arguments() {
        let cache = CallCache::new(
            OperationIdentity::function("tests::sqrt"),
            chain::<f64>(vec![Arc::new(LruTier::<f64>::new(10))]),
        );
        let sqrt = CachedFn::new(cache, |(x,): (f64,)| async move { Ok::<_, String>(x.sqrt()) });

        assert_eq!(sqrt.call((16.0,)).await.unwrap(), 4.0);
        let err = sqrt.call((f64::NAN,)).await.unwrap_err();
        assert!(matches!(err, CallCacheError::Fingerprint(_)));
    }
}
