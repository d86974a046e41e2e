//! # Guarded HTTP Client
//!
//! Outbound calls wrapped by a circuit breaker, a timeout, status classification
//! and an optional cache-control response cache.
//!
//! ```rust,no_run
//! use callguard::config::RequestSettings;
//! use callguard::http::GuardedClient;
//! use callguard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = Arc::new(CircuitBreaker::new("weather", CircuitBreakerConfig::default())?);
//! let client = GuardedClient::new(breaker, &RequestSettings::default())?;
//!
//! let response = client.get("https://weather.example/today").await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

use super::errors::RequestError;
use super::response_cache::{CachedResponse, HttpResponseCache};
use super::status::{StatusCodes, StatusPolicy};
use crate::config::RequestSettings;
use crate::resilience::{CallPermit, CircuitBreaker};
use crate::telemetry::{NoopTracer, Span, Tracer};
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Proxy, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-call request parameters
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Overrides the client's default timeout for this call
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON request body
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| RequestError::Build(format!("Cannot serialize JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A fully read response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Served from the response cache without a network call
    pub from_cache: bool,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

impl From<CachedResponse> for HttpResponse {
    fn from(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            headers: cached.headers,
            body: cached.body,
            from_cache: true,
        }
    }
}

/// Hosts routed through the local services proxy
pub fn is_local_service_host(host: &str) -> bool {
    host.starts_with("service-") && host.ends_with("-service")
}

/// HTTP client whose calls pass through a shared [`CircuitBreaker`]
///
/// Cloning is cheap; clones share the connection pool, breaker and response cache.
#[derive(Clone)]
pub struct GuardedClient {
    client: Client,
    local_services: Option<Client>,
    breaker: Arc<CircuitBreaker>,
    policy: StatusPolicy,
    response_cache: Option<HttpResponseCache>,
    internal: bool,
    timeout: Duration,
    tracer: Arc<dyn Tracer>,
}

impl std::fmt::Debug for GuardedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedClient")
            .field("breaker", &self.breaker.name())
            .field("internal", &self.internal)
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .field("response_cache", &self.response_cache.is_some())
            .field("local_services_proxy", &self.local_services.is_some())
            .finish()
    }
}

impl GuardedClient {
    /// Client with default status policy and an LRU response cache sized from `settings`
    pub fn new(breaker: Arc<CircuitBreaker>, settings: &RequestSettings) -> Result<Self, RequestError> {
        let client = Self::client_builder()
            .build()
            .map_err(|e| RequestError::Build(format!("Failed to create HTTP client: {e}")))?;

        let local_services = match &settings.local_services_proxy {
            Some(proxy_url) => {
                let proxy = Proxy::http(proxy_url)
                    .map_err(|e| RequestError::Build(format!("Invalid local services proxy: {e}")))?;
                let proxied = Self::client_builder()
                    .proxy(proxy)
                    .build()
                    .map_err(|e| RequestError::Build(format!("Failed to create HTTP client: {e}")))?;
                debug!(proxy = %proxy_url, "Local services proxy enabled");
                Some(proxied)
            }
            None => None,
        };

        debug!(
            component = %breaker.name(),
            timeout_seconds = settings.timeout_seconds,
            http_cache_size = settings.http_cache_size,
            "Created guarded HTTP client"
        );

        Ok(Self {
            client,
            local_services,
            breaker,
            policy: StatusPolicy::default(),
            response_cache: Some(HttpResponseCache::with_capacity(settings.http_cache_size)),
            internal: false,
            timeout: settings.timeout(),
            tracer: Arc::new(NoopTracer),
        })
    }

    fn client_builder() -> reqwest::ClientBuilder {
        Client::builder().user_agent(format!("callguard/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Mark calls as in-cluster; internal calls skip tracing header injection
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    /// Only these statuses succeed (when non-empty)
    pub fn good_codes(mut self, codes: StatusCodes) -> Self {
        self.policy.good_codes = codes;
        self
    }

    /// Statuses that fail when no good codes are set
    pub fn bad_codes(mut self, codes: StatusCodes) -> Self {
        self.policy.bad_codes = codes;
        self
    }

    pub fn with_response_cache(mut self, cache: HttpResponseCache) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn without_response_cache(mut self) -> Self {
        self.response_cache = None;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Default timeout for calls that do not set their own
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn response_cache(&self) -> Option<&HttpResponseCache> {
        self.response_cache.as_ref()
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, RequestError> {
        self.request(Method::GET, url, RequestOptions::default()).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, RequestError> {
        self.request(Method::POST, url, options).await
    }

    /// Execute one guarded call
    ///
    /// The breaker admits the call before anything else happens, so an Open
    /// breaker rejects even requests the response cache could answer. Cached
    /// and network responses are classified alike: timeouts, connection errors
    /// and bad statuses are reported to the breaker as failures.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let parsed = Url::parse(url).map_err(|e| RequestError::Build(format!("Invalid URL {url}: {e}")))?;
        let timeout = options.timeout.unwrap_or(self.timeout);

        let mode = if self.internal { "internal" } else { "external" };
        let mut span = self.tracer.start_span(&format!("HTTP request ({mode})"));
        span.set_tag("http_method", method.as_str().into());
        span.set_tag("http_url", url.into());
        span.set_tag("request_start", Utc::now().timestamp_millis().into());

        let Some(permit) = self.breaker.try_acquire() else {
            let error = RequestError::CircuitOpen {
                component: self.breaker.name().to_string(),
            };
            return Err(self.fail(span.as_mut(), error));
        };

        let started = Instant::now();
        let headers = options.headers;

        if let Some(cached) = self
            .response_cache
            .as_ref()
            .and_then(|cache| cache.lookup(&method, url, &headers))
        {
            debug!(url = %url, status = cached.status, "HTTP response served from cache");
            span.set_tag("http_cache", "hit".into());
            let response = HttpResponse::from(cached);
            return self.classify(span.as_mut(), permit, url, response, started.elapsed());
        }

        // Injected after the cache lookup so trace ids never reach cache matching
        let mut outbound = headers.clone();
        if self.internal {
            debug!(url = %url, "Internal service, skipping tracing headers");
        } else {
            span.inject(&mut outbound);
        }

        let mut builder = self
            .client_for(&parsed)
            .request(method.clone(), parsed)
            .headers(outbound)
            .timeout(timeout);
        if let Some(body) = options.body {
            builder = builder.body(body);
        }

        let outcome = send(builder, url, timeout).await;
        let elapsed = started.elapsed();

        let response = match outcome {
            Ok(response) => response,
            Err(RequestError::Build(message)) => {
                // Never sent, so the dependency's health is unknown
                drop(permit);
                return Err(self.fail(span.as_mut(), RequestError::Build(message)));
            }
            Err(error) => {
                permit.record_failure(elapsed);
                return Err(self.fail(span.as_mut(), error));
            }
        };

        if let Some(cache) = &self.response_cache {
            cache.store(&method, url, &headers, response.status, &response.headers, &response.body);
        }

        self.classify(span.as_mut(), permit, url, response, elapsed)
    }

    /// Report the response's classification to the breaker and the span
    fn classify(
        &self,
        span: &mut dyn Span,
        permit: CallPermit<'_>,
        url: &str,
        response: HttpResponse,
        elapsed: Duration,
    ) -> Result<HttpResponse, RequestError> {
        span.set_tag("request_end", Utc::now().timestamp_millis().into());
        span.set_tag("http_status_code", response.status.into());

        if self.policy.is_success(response.status) {
            permit.record_success(elapsed);
            debug!(url = %url, status = response.status, from_cache = response.from_cache, "HTTP completed");
            Ok(response)
        } else {
            permit.record_failure(elapsed);
            let error = RequestError::BadResponse {
                status: response.status,
                url: url.to_string(),
            };
            Err(self.fail(span, error))
        }
    }

    fn client_for(&self, url: &Url) -> &Client {
        match (&self.local_services, url.host_str()) {
            (Some(proxied), Some(host)) if is_local_service_host(host) => {
                debug!(host = %host, "Routing through local services proxy");
                proxied
            }
            _ => &self.client,
        }
    }

    fn fail(&self, span: &mut dyn Span, error: RequestError) -> RequestError {
        warn!(component = %self.breaker.name(), error = %error, "HTTP request failed");
        span.log_kv("error", &error.to_string());
        error
    }
}

async fn send(builder: RequestBuilder, url: &str, timeout: Duration) -> Result<HttpResponse, RequestError> {
    let response = builder
        .send()
        .await
        .map_err(|e| RequestError::from_transport(e, url, timeout))?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .await
        .map_err(|e| RequestError::from_transport(e, url, timeout))?;

    Ok(HttpResponse {
        status,
        headers,
        body,
        from_cache: false,
    })
}
