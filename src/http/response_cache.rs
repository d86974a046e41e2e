//! # HTTP Response Cache
//!
//! Stores responses according to their cache-control headers so repeated
//! requests inside the freshness window never reach the network.
//!
//! Rules:
//! - only `GET`/`HEAD` requests are looked up or stored
//! - only statuses in [`CACHEABLE_STATUSES`] are stored
//! - `Cache-Control: no-store` on the response prevents storage
//! - freshness is `max-age`, or `Expires` minus `Date`; no positive lifetime, no storage
//! - `Cache-Control: no-cache`/`no-store` on the request bypasses the lookup
//! - `Vary` headers pin an entry to the request header values it was stored for

use crate::cache::{CacheChain, CacheTier, LruTier};
use crate::fingerprint::{CacheKey, Fingerprinter, OperationIdentity};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Statuses a response may have to be stored
pub const CACHEABLE_STATUSES: [u16; 7] = [200, 203, 300, 301, 308, 404, 410];

/// Parsed `Cache-Control` directives that affect storage and lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<Duration>,
}

impl CacheControl {
    /// Merge every `Cache-Control` header in `headers`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut directives = CacheControl::default();
        let values = headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok());

        for value in values {
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, argument) = match directive.split_once('=') {
                    Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                match name.to_ascii_lowercase().as_str() {
                    "no-store" => directives.no_store = true,
                    "no-cache" => directives.no_cache = true,
                    "max-age" => {
                        if let Some(seconds) = argument.and_then(|a| a.parse::<u64>().ok()) {
                            directives.max_age = Some(Duration::from_secs(seconds));
                        }
                    }
                    _ => {}
                }
            }
        }
        directives
    }
}

fn parse_http_date(headers: &HeaderMap, name: HeaderName) -> Option<DateTime<Utc>> {
    let value = headers.get(name)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// How long a response stays fresh, if it may be stored at all
pub fn freshness_lifetime(headers: &HeaderMap) -> Option<Duration> {
    let directives = CacheControl::from_headers(headers);
    if directives.no_store {
        return None;
    }
    if let Some(max_age) = directives.max_age {
        return (!max_age.is_zero()).then_some(max_age);
    }

    let expires = parse_http_date(headers, header::EXPIRES)?;
    let date = parse_http_date(headers, header::DATE).unwrap_or_else(Utc::now);
    let lifetime = (expires - date).to_std().ok()?;
    (!lifetime.is_zero()).then_some(lifetime)
}

/// A stored response plus what is needed to decide whether it still applies
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    stored_at: Instant,
    fresh_for: Duration,
    /// Request header values named by the response's `Vary`
    vary: Vec<(HeaderName, Option<HeaderValue>)>,
}

impl CachedResponse {
    pub fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.fresh_for
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    fn matches(&self, request_headers: &HeaderMap) -> bool {
        self.vary
            .iter()
            .all(|(name, value)| request_headers.get(name) == value.as_ref())
    }
}

/// Request header values for every name listed in `Vary`; `None` for `Vary: *`
fn varied_values(
    response_headers: &HeaderMap,
    request_headers: &HeaderMap,
) -> Option<Vec<(HeaderName, Option<HeaderValue>)>> {
    let mut vary = Vec::new();
    for value in response_headers.get_all(header::VARY) {
        let value = value.to_str().ok()?;
        for name in value.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            if name == "*" {
                return None;
            }
            let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()).ok()?;
            let request_value = request_headers.get(&name).cloned();
            vary.push((name, request_value));
        }
    }
    Some(vary)
}

fn header_text<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Response cache backed by a [`CacheChain`]
///
/// Clones share the same tiers.
#[derive(Debug, Clone)]
pub struct HttpResponseCache {
    chain: CacheChain<CachedResponse>,
    fingerprinter: Fingerprinter,
    identity: OperationIdentity,
}

impl HttpResponseCache {
    pub fn new(chain: CacheChain<CachedResponse>) -> Self {
        Self {
            chain,
            fingerprinter: Fingerprinter::default(),
            identity: OperationIdentity::function("http::response"),
        }
    }

    /// A single LRU tier holding `capacity` responses
    pub fn with_capacity(capacity: usize) -> Self {
        let tier: Arc<dyn CacheTier<CachedResponse>> =
            Arc::new(LruTier::<CachedResponse>::new(capacity));
        Self::new(CacheChain::new(vec![tier]))
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn chain(&self) -> &CacheChain<CachedResponse> {
        &self.chain
    }

    /// Whether a request may be answered from the cache
    pub fn is_cacheable_request(method: &Method, request_headers: &HeaderMap) -> bool {
        if *method != Method::GET && *method != Method::HEAD {
            return false;
        }
        let directives = CacheControl::from_headers(request_headers);
        !(directives.no_cache || directives.no_store)
    }

    fn key(&self, method: &Method, url: &str, request_headers: &HeaderMap) -> Option<CacheKey> {
        let args = (
            method.as_str(),
            url,
            header_text(request_headers, &header::ACCEPT),
            header_text(request_headers, &header::ACCEPT_LANGUAGE),
        );
        match self.fingerprinter.fingerprint_call(&self.identity, &args, false) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(url = %url, error = %e, "Cannot compute response cache key");
                None
            }
        }
    }

    /// Fresh stored response for this request, if any
    pub fn lookup(
        &self,
        method: &Method,
        url: &str,
        request_headers: &HeaderMap,
    ) -> Option<CachedResponse> {
        if !Self::is_cacheable_request(method, request_headers) {
            return None;
        }
        let key = self.key(method, url, request_headers)?;
        let hit = self.chain.lookup(&key)?;

        if !hit.value.is_fresh() {
            debug!(url = %url, age_ms = hit.value.age().as_millis() as u64, "Stored response is stale");
            for index in 0..self.chain.len() {
                if let Some(tier) = self.chain.tier(index) {
                    tier.delete(&key);
                }
            }
            return None;
        }
        if !hit.value.matches(request_headers) {
            debug!(url = %url, "Stored response varies on different request headers");
            return None;
        }
        Some(hit.value)
    }

    /// Store a response if its method, status and headers allow it
    ///
    /// Returns whether the response was stored.
    pub fn store(
        &self,
        method: &Method,
        url: &str,
        request_headers: &HeaderMap,
        status: u16,
        response_headers: &HeaderMap,
        body: &Bytes,
    ) -> bool {
        if *method != Method::GET && *method != Method::HEAD {
            return false;
        }
        if !CACHEABLE_STATUSES.contains(&status) {
            return false;
        }
        let Some(fresh_for) = freshness_lifetime(response_headers) else {
            return false;
        };
        let Some(vary) = varied_values(response_headers, request_headers) else {
            return false;
        };
        let Some(key) = self.key(method, url, request_headers) else {
            return false;
        };

        debug!(
            url = %url,
            status = status,
            fresh_for_seconds = fresh_for.as_secs(),
            "Storing HTTP response"
        );
        let response = CachedResponse {
            status,
            headers: response_headers.clone(),
            body: body.clone(),
            stored_at: Instant::now(),
            fresh_for,
            vary,
        };
        self.chain.populate(&key, &response, 0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    const URL: &str = "http://weather.example/today";

    #[test]
    fn test_cache_control_parsing() {
        let cc = CacheControl::from_headers(&headers(&[
            ("cache-control", "public, max-age=120"),
            ("cache-control", "No-Cache"),
        ]));
        assert_eq!(cc.max_age, Some(Duration::from_secs(120)));
        assert!(cc.no_cache);
        assert!(!cc.no_store);
    }

    #[test]
    fn test_freshness_from_expires_and_date() {
        let lifetime = freshness_lifetime(&headers(&[
            ("date", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ("expires", "Wed, 21 Oct 2015 07:38:00 GMT"),
        ]));
        assert_eq!(lifetime, Some(Duration::from_secs(600)));

        let expired = freshness_lifetime(&headers(&[
            ("date", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ("expires", "Wed, 21 Oct 2015 07:00:00 GMT"),
        ]));
        assert_eq!(expired, None);
    }

    #[test]
    fn test_no_store_and_missing_lifetime_are_not_stored() {
        let cache = HttpResponseCache::with_capacity(10);
        let request = HeaderMap::new();
        let body = Bytes::from_static(b"sunny");

        let no_store = headers(&[("cache-control", "no-store, max-age=60")]);
        assert!(!cache.store(&Method::GET, URL, &request, 200, &no_store, &body));
        assert!(!cache.store(&Method::GET, URL, &request, 200, &HeaderMap::new(), &body));
        assert!(cache.lookup(&Method::GET, URL, &request).is_none());
    }

    #[test]
    fn test_only_get_head_and_listed_statuses() {
        let cache = HttpResponseCache::with_capacity(10);
        let request = HeaderMap::new();
        let fresh = headers(&[("cache-control", "max-age=60")]);
        let body = Bytes::new();

        assert!(!cache.store(&Method::POST, URL, &request, 200, &fresh, &body));
        assert!(!cache.store(&Method::GET, URL, &request, 500, &fresh, &body));
        assert!(!cache.store(&Method::GET, URL, &request, 201, &fresh, &body));
        assert!(cache.store(&Method::GET, URL, &request, 404, &fresh, &body));
        assert_eq!(cache.lookup(&Method::GET, URL, &request).map(|r| r.status), Some(404));
        // HEAD is keyed separately
        assert!(cache.lookup(&Method::HEAD, URL, &request).is_none());
    }

    #[test]
    fn test_request_no_cache_bypasses_lookup() {
        let cache = HttpResponseCache::with_capacity(10);
        let fresh = headers(&[("cache-control", "max-age=60")]);
        cache.store(&Method::GET, URL, &HeaderMap::new(), 200, &fresh, &Bytes::new());

        let bypass = headers(&[("cache-control", "no-cache")]);
        assert!(cache.lookup(&Method::GET, URL, &bypass).is_none());
        assert!(cache.lookup(&Method::GET, URL, &HeaderMap::new()).is_some());
    }

    #[test]
    fn test_accept_language_is_part_of_the_key() {
        let cache = HttpResponseCache::with_capacity(10);
        let fresh = headers(&[("cache-control", "max-age=60")]);
        let german = headers(&[("accept-language", "de")]);
        let english = headers(&[("accept-language", "en")]);

        cache.store(&Method::GET, URL, &german, 200, &fresh, &Bytes::from_static(b"sonnig"));
        assert!(cache.lookup(&Method::GET, URL, &english).is_none());
        assert_eq!(
            cache.lookup(&Method::GET, URL, &german).map(|r| r.body),
            Some(Bytes::from_static(b"sonnig"))
        );
    }

    #[test]
    fn test_vary_pins_request_headers() {
        let cache = HttpResponseCache::with_capacity(10);
        let varied = headers(&[("cache-control", "max-age=60"), ("vary", "X-Device")]);
        let phone = headers(&[("x-device", "phone")]);
        let speaker = headers(&[("x-device", "speaker")]);

        assert!(cache.store(&Method::GET, URL, &phone, 200, &varied, &Bytes::new()));
        assert!(cache.lookup(&Method::GET, URL, &phone).is_some());
        assert!(cache.lookup(&Method::GET, URL, &speaker).is_none());

        let star = headers(&[("cache-control", "max-age=60"), ("vary", "*")]);
        assert!(!cache.store(&Method::GET, "http://other.example", &phone, 200, &star, &Bytes::new()));
    }

    #[test]
    fn test_stale_entry_is_a_miss() {
        let cache = HttpResponseCache::with_capacity(10);
        let short = headers(&[("cache-control", "max-age=1")]);
        cache.store(&Method::GET, URL, &HeaderMap::new(), 200, &short, &Bytes::new());
        assert!(cache.lookup(&Method::GET, URL, &HeaderMap::new()).is_some());

        sleep(Duration::from_millis(1100));
        assert!(cache.lookup(&Method::GET, URL, &HeaderMap::new()).is_none());
        assert_eq!(cache.chain().tier(0).map(|tier| tier.len()), Some(0));
    }
}
