//! HTTP dispatch for the API core.
//!
//! `Transport` is the seam between the retry/auth logic and the network.
//! `ReqwestTransport` is the production implementation; tests substitute a
//! scripted transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{SwitchError, TransportError};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections kept per switch.
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// One dispatch attempt. Built fresh for every attempt because the bearer
/// token may change between attempts.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully-qualified HTTPS URL.
    pub url: String,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
    /// Extra query parameters (on top of any query string in `url`).
    pub query: Vec<(String, String)>,
    /// Request headers, including `Authorization` when authenticated.
    pub headers: HeaderMap,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl ApiRequest {
    /// Creates a request with no body, query or headers.
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            method,
            url: url.into(),
            body: None,
            query: Vec::new(),
            headers,
            timeout,
        }
    }

    /// The bearer token carried by this request, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }
}

/// The undecoded result of a dispatch that received an HTTP status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body text.
    pub body: String,
}

impl RawResponse {
    /// Creates a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Sends one request and returns whatever status the switch answered with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatches a single attempt. Must not retry on its own.
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport. Cloning is cheap and shares the connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Creates the transport from configuration.
    ///
    /// TLS verification follows `config.verify_ssl`; the pool settings are
    /// fixed for the lifetime of the transport.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::HttpClient` if the HTTP client fails to initialize.
    pub fn new(config: &Config) -> Result<Self, SwitchError> {
        if !config.verify_ssl {
            tracing::warn!("TLS certificate verification is disabled");
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .timeout(config.timeout)
            .build()
            .map_err(SwitchError::HttpClient)?;

        Ok(Self { http })
    }

    /// Wraps an existing client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Enforces a minimum spacing between dispatched requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Option<Duration>,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Allows at most `per_second` requests per second; 0 disables limiting.
    pub fn per_second(per_second: u32) -> Self {
        let min_interval = (per_second > 0).then(|| Duration::from_secs(1) / per_second);
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::per_second(0)
    }

    /// Waits until the next request may be sent.
    pub async fn acquire(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };

        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
