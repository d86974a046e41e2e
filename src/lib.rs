#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # callguard
//!
//! Multi-tier call caching in front of circuit-breaker guarded outbound requests.
//!
//! ## Overview
//!
//! A caller invokes a wrapped operation. The [`cache::CallCache`] fingerprints the
//! call and consults its [`cache::CacheChain`]. On a miss the operation runs,
//! which may itself be an HTTP call through a [`http::GuardedClient`] that asks a
//! shared [`resilience::CircuitBreaker`] for admission and keeps its own
//! cache-control response cache. Successful results are written back through the
//! chain; failures are never cached.
//!
//! ## Module Organization
//!
//! - [`fingerprint`] - deterministic cache keys from operation identity and arguments
//! - [`cache`] - FIFO, LRU and TTL tiers, the chain, and the call wrapper
//! - [`resilience`] - circuit breaker state machine, metrics and registry
//! - [`http`] - guarded HTTP client and response cache
//! - [`telemetry`] - tracer collaborator for span tags and header injection
//! - [`config`] - settings loaded once from defaults, TOML and environment
//! - [`logging`] - structured logging bootstrap
//! - [`error`] - crate-level error type
//!
//! ## Quick Start
//!
//! ```rust
//! use callguard::cache::{CacheChain, CacheTier, CachedFn, CallCache, FifoTier, LruTier};
//! use callguard::fingerprint::OperationIdentity;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tiers: Vec<Arc<dyn CacheTier<String>>> = vec![
//!     Arc::new(FifoTier::<String>::new(10)),
//!     Arc::new(LruTier::<String>::new(100)),
//! ];
//! let cache = CallCache::new(
//!     OperationIdentity::function("weather::forecast"),
//!     CacheChain::new(tiers),
//! );
//! let forecast = CachedFn::new(cache, |(city,): (String,)| async move {
//!     Ok::<_, std::io::Error>(format!("sunny in {city}"))
//! });
//!
//! assert_eq!(forecast.call(("Bonn".to_string(),)).await?, "sunny in Bonn");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod logging;
pub mod resilience;
pub mod telemetry;

pub use cache::{CacheChain, CacheTier, CachedFn, CallCache, CallCacheError, FifoTier, LruTier, TtlTier};
pub use config::CallGuardConfig;
pub use error::{CallGuardError, Result};
pub use fingerprint::{CacheKey, CallArgs, Fingerprinter, OperationIdentity};
pub use http::{GuardedClient, HttpResponse, RequestError, RequestOptions};
pub use logging::init_structured_logging;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager, CircuitState};
pub use telemetry::{NoopTracer, Tracer};
