//! # Guarded Outbound Requests
//!
//! Network calls executed through a shared circuit breaker:
//!
//! - [`GuardedClient`]: timeout, breaker admission, status classification, tracing
//! - [`StatusPolicy`]: good/bad status code sets
//! - [`HttpResponseCache`]: cache-control driven response cache on a [`CacheChain`](crate::cache::CacheChain)

pub mod client;
pub mod errors;
pub mod response_cache;
pub mod status;

pub use client::{is_local_service_host, GuardedClient, HttpResponse, RequestOptions};
pub use errors::RequestError;
pub use response_cache::{freshness_lifetime, CacheControl, CachedResponse, HttpResponseCache, CACHEABLE_STATUSES};
pub use status::{StatusCodes, StatusPolicy};

pub use reqwest::Method;
