//! The API call core: one authenticated request to the switch, with
//! backoff on transient failures and a single re-login on HTTP 401.
//!
//! The core holds no session state of its own. It receives the bearer token
//! with every call and reports a replacement through
//! [`CallOutcome::refreshed_token`]; whoever owns the token decides whether
//! to keep it. How a replacement is obtained is pluggable through
//! [`Reauthenticate`], so a session can serialize concurrent refreshes while
//! stateless callers just log in again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;

use crate::auth::{AuthToken, CredentialProvider, Credentials, TOKEN_TYPE};
use crate::config::Config;
use crate::error::{is_retryable_status, SwitchError, TransportError};
use crate::models::{ApiResult, LoginRequest, LoginResponse};
use crate::response::{validate_response, ApiResponse};
use crate::retry::{self, RetryContext, RetryDecision, RetryPolicy};
use crate::switch_url::SwitchTarget;
use crate::transport::{ApiRequest, RateLimiter, RawResponse, Transport, DEFAULT_TIMEOUT};

/// Endpoint of the login exchange.
pub const LOGIN_ENDPOINT: &str = "login";

/// Description of one logical call. Reused unchanged for every attempt.
#[derive(Debug, Clone)]
pub struct ApiCall {
    method: Method,
    endpoint: String,
    body: Option<serde_json::Value>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    timeout: Option<Duration>,
    deadline: Option<Duration>,
}

impl ApiCall {
    /// A call with the given method and endpoint path (e.g. `"device_info"`).
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            query: Vec::new(),
            headers: HeaderMap::new(),
            timeout: None,
            deadline: None,
        }
    }

    /// A `GET` call.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// A `POST` call.
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a request header. `Authorization` is always overwritten by the core.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Overrides the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bounds the whole call, backoff sleeps and re-authentication included.
    /// A deadline too far away to represent is ignored.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The endpoint path as given.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// A successful call.
#[derive(Debug)]
pub struct CallOutcome {
    /// The validated response.
    pub response: ApiResponse,
    /// Token obtained by re-authenticating after a 401, if that happened.
    /// The caller should use it from now on.
    pub refreshed_token: Option<AuthToken>,
}

/// Obtains a replacement for a token the switch rejected.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
    /// Returns a fresh token. `rejected` is the token that drew the 401.
    async fn reauthenticate(&self, core: &ApiCore, rejected: &str)
        -> Result<AuthToken, SwitchError>;
}

/// Re-authenticates by logging in with the provider's credentials.
pub struct LoginWith<'a>(pub &'a dyn CredentialProvider);

#[async_trait]
impl Reauthenticate for LoginWith<'_> {
    async fn reauthenticate(
        &self,
        core: &ApiCore,
        _rejected: &str,
    ) -> Result<AuthToken, SwitchError> {
        let credentials = self.0.credentials()?;
        core.login(&credentials).await
    }
}

/// Issues authenticated calls against one switch.
///
/// Cloning is cheap; clones share the transport and the rate limiter.
#[derive(Clone)]
pub struct ApiCore {
    transport: Arc<dyn Transport>,
    target: SwitchTarget,
    policy: RetryPolicy,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for ApiCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCore")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ApiCore {
    /// A core with the default policy, timeout and no rate limit.
    pub fn new(transport: Arc<dyn Transport>, target: SwitchTarget) -> Self {
        Self {
            transport,
            target,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            limiter: Arc::new(RateLimiter::unlimited()),
        }
    }

    /// A core whose policy, timeout and rate limit come from `config`.
    pub fn from_config(transport: Arc<dyn Transport>, target: SwitchTarget, config: &Config) -> Self {
        Self::new(transport, target)
            .with_policy(config.retry_policy())
            .with_timeout(config.timeout)
            .with_rate_limit(config.rate_limit)
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the default per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Limits dispatches to `per_second` (0 disables limiting).
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = Arc::new(RateLimiter::per_second(per_second));
        self
    }

    /// Shares `limiter` with other cores, so their combined rate is bounded.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// The switch this core talks to.
    pub fn target(&self) -> &SwitchTarget {
        &self.target
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs `call` with `token`, logging in with `credentials` if the
    /// token is rejected.
    pub async fn call(
        &self,
        call: &ApiCall,
        token: &str,
        credentials: &dyn CredentialProvider,
    ) -> Result<CallOutcome, SwitchError> {
        self.call_with(call, token, &LoginWith(credentials)).await
    }

    /// Performs `call` with `token`, asking `reauth` for a replacement if the
    /// token is rejected.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the endpoint cannot form a URL
    /// - `InvalidResponseFormat` if a 2xx body is not a valid envelope
    /// - `Authentication` if re-authentication fails or the fresh token is
    ///   rejected as well
    /// - `Api` for a non-retryable HTTP status
    /// - `RequestFailedAfterRetries` once the attempt budget or the deadline
    ///   is used up
    /// - `Transport` for a non-retryable transport failure
    pub async fn call_with(
        &self,
        call: &ApiCall,
        token: &str,
        reauth: &dyn Reauthenticate,
    ) -> Result<CallOutcome, SwitchError> {
        let url = self.target.url(&call.endpoint)?;
        let deadline = call.deadline.and_then(|limit| Instant::now().checked_add(limit));
        let timeout = call.timeout.unwrap_or(self.timeout);

        let mut token = token.to_string();
        let mut refreshed: Option<AuthToken> = None;
        let mut ctx = RetryContext::new();

        loop {
            let attempt = ctx.begin_attempt();
            let attempt_timeout = match remaining(deadline, timeout) {
                Some(t) => t,
                None => return Err(deadline_exceeded(ctx, call.deadline)),
            };

            tracing::debug!(
                method = %call.method,
                endpoint = %call.endpoint,
                attempt,
                "Calling switch API"
            );

            let mut request = ApiRequest::new(call.method.clone(), url.clone(), attempt_timeout);
            request.body = call.body.clone();
            request.query = call.query.clone();
            request.headers.extend(call.headers.clone());
            request
                .headers
                .insert(AUTHORIZATION, bearer_header(&token)?);

            let failure = match self.dispatch(request).await {
                Ok(raw) if raw.status.is_success() => {
                    let response = validate_response(raw.status, raw.headers, &raw.body)?;
                    return Ok(CallOutcome {
                        response,
                        refreshed_token: refreshed,
                    });
                }
                Ok(raw) if raw.status == StatusCode::UNAUTHORIZED => {
                    if refreshed.is_some() {
                        tracing::warn!(endpoint = %call.endpoint, "Fresh token rejected as well");
                        return Err(SwitchError::authentication_caused_by(
                            "token rejected again after re-authentication",
                            SwitchError::api(raw.status, &raw.body),
                        ));
                    }

                    tracing::info!(endpoint = %call.endpoint, "Token rejected, re-authenticating");
                    let login_core = self.clone().with_timeout(timeout);
                    let relogin = reauth.reauthenticate(&login_core, &token);
                    let fresh = match deadline {
                        Some(deadline) => match tokio::time::timeout_at(deadline, relogin).await {
                            Ok(result) => result,
                            Err(_) => {
                                tracing::warn!(
                                    endpoint = %call.endpoint,
                                    "Deadline passed during re-authentication"
                                );
                                ctx.record_failure(
                                    TransportError::Timeout(call.deadline.unwrap_or_default()).into(),
                                );
                                return Err(ctx.into_exhausted());
                            }
                        },
                        None => relogin.await,
                    }
                    .map_err(as_authentication)?;
                    token = fresh.access_token().to_string();
                    refreshed = Some(fresh);
                    ctx.forgive_attempt();
                    continue;
                }
                Ok(raw) => Failure::from_status(raw),
                Err(e) => Failure::from_transport(e),
            };

            self.back_off(&mut ctx, &call.endpoint, failure, deadline, &[token.as_str()])
                .await?;
        }
    }

    /// Runs the login exchange and returns the decoded payload.
    ///
    /// Timeouts, connection failures and 5xx replies are retried like any
    /// other call. A 429 counts as a refusal and is not retried. The request
    /// carries no bearer token.
    ///
    /// # Errors
    ///
    /// - `Authentication` if the switch refuses the credentials, in JSON or
    ///   in plain text, or rate-limits the login
    /// - `InvalidResponseFormat` if a success reply lacks a usable payload
    /// - `RequestFailedAfterRetries` if the switch stays unavailable
    pub async fn login_exchange(
        &self,
        credentials: &Credentials,
    ) -> Result<ApiResult<LoginResponse>, SwitchError> {
        let url = self.target.url(LOGIN_ENDPOINT)?;
        let body = serde_json::to_value(LoginRequest::new(credentials))?;
        let mut ctx = RetryContext::new();

        tracing::debug!(username = %credentials.username, host = %self.target.host, "Logging in");

        loop {
            ctx.begin_attempt();
            let mut request = ApiRequest::new(Method::POST, url.clone(), self.timeout);
            request.body = Some(body.clone());

            let failure = match self.dispatch(request).await {
                Ok(raw) if raw.status.is_success() => return parse_login(raw),
                Ok(raw) if raw.status != StatusCode::TOO_MANY_REQUESTS
                    && is_retryable_status(raw.status) =>
                {
                    Failure::from_status(raw)
                }
                Ok(raw) => return Err(login_refused(raw)),
                Err(e) => Failure::from_transport(e),
            };

            self.back_off(&mut ctx, LOGIN_ENDPOINT, failure, None, &[credentials.password.as_str()])
                .await?;
        }
    }

    /// Logs in and returns the token, issued now.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthToken, SwitchError> {
        let result = self.login_exchange(credentials).await?;
        let token = result.data.to_token()?;
        tracing::info!(
            host = %self.target.host,
            expires_in_secs = token.expires_in().as_secs(),
            "Logged in to switch"
        );
        Ok(token)
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        self.limiter.acquire().await;
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    /// Sleeps before the next attempt, or returns the error to surface.
    async fn back_off(
        &self,
        ctx: &mut RetryContext,
        operation: &str,
        failure: Failure,
        deadline: Option<Instant>,
        secrets: &[&str],
    ) -> Result<(), SwitchError> {
        let attempt = ctx.attempts();
        let Failure { error, retry_after } = failure;

        match self.policy.decide(&error, attempt, retry_after) {
            RetryDecision::Retry(delay)
                if deadline.map_or(true, |d| Instant::now().checked_add(delay).is_some_and(|end| end < d)) =>
            {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.sanitized_display(secrets),
                    "Transient failure, retrying"
                );
                ctx.record_failure(error);
                ctx.record_wait(delay);
                tokio::time::sleep(delay).await;
                Ok(())
            }
            RetryDecision::Retry(_) => {
                tracing::warn!(operation, attempt, "Deadline leaves no room for another attempt");
                ctx.record_failure(error);
                Err(std::mem::take(ctx).into_exhausted())
            }
            RetryDecision::GiveUp if error.is_retryable() => {
                tracing::warn!(
                    operation,
                    attempts = attempt,
                    waited_ms = ctx.waited().as_millis() as u64,
                    "Giving up after transient failures"
                );
                ctx.record_failure(error);
                Err(std::mem::take(ctx).into_exhausted())
            }
            RetryDecision::GiveUp => Err(error),
        }
    }
}

struct Failure {
    error: SwitchError,
    retry_after: Option<Duration>,
}

impl Failure {
    fn from_status(raw: RawResponse) -> Self {
        Self {
            retry_after: retry::retry_after(&raw.headers),
            error: SwitchError::api(raw.status, &raw.body),
        }
    }

    fn from_transport(error: TransportError) -> Self {
        Self {
            error: error.into(),
            retry_after: None,
        }
    }
}

/// Time left for the next attempt, or `None` once the deadline has passed.
fn remaining(deadline: Option<Instant>, timeout: Duration) -> Option<Duration> {
    match deadline {
        None => Some(timeout),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            (!left.is_zero()).then(|| left.min(timeout))
        }
    }
}

fn deadline_exceeded(mut ctx: RetryContext, limit: Option<Duration>) -> SwitchError {
    ctx.forgive_attempt();
    ctx.record_failure(TransportError::Timeout(limit.unwrap_or_default()).into());
    ctx.into_exhausted()
}

fn bearer_header(token: &str) -> Result<HeaderValue, SwitchError> {
    let mut value = HeaderValue::from_str(&format!("{} {}", TOKEN_TYPE, token))
        .map_err(|_| SwitchError::invalid_argument("token contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn as_authentication(error: SwitchError) -> SwitchError {
    match error {
        SwitchError::Authentication { .. } => error,
        other => SwitchError::authentication_caused_by("re-authentication failed", other),
    }
}

fn parse_login(raw: RawResponse) -> Result<ApiResult<LoginResponse>, SwitchError> {
    let response = match validate_response(raw.status, raw.headers, &raw.body) {
        Ok(response) => response,
        Err(e) if raw.body.trim_start().starts_with(['{', '[']) => return Err(e),
        Err(e) => {
            return Err(SwitchError::authentication_caused_by(
                format!("login failed: {}", raw.body.trim()),
                e,
            ))
        }
    };

    ApiResult::from_response(&response, |resp| {
        SwitchError::authentication(format!("login failed: {}", resp.resp_msg))
    })
}

fn login_refused(raw: RawResponse) -> SwitchError {
    let error = SwitchError::api(raw.status, &raw.body);
    let message = match &error {
        SwitchError::Api { body, .. } => format!("login failed: {}", body),
        _ => "login failed".to_string(),
    };
    SwitchError::authentication_caused_by(message, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoCredentials;
    use crate::test_support::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn switch_core(transport: &Arc<MockTransport>) -> ApiCore {
        let transport: Arc<dyn Transport> = transport.clone();
        ApiCore::new(transport, SwitchTarget::new("192.168.99.92", 8443).unwrap())
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "password123").unwrap()
    }

    fn device_info() -> ApiCall {
        ApiCall::get("device_info")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let transport = Arc::new(MockTransport::new().reply(200, DEVICE_INFO_BODY));
        let outcome = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();

        assert!(outcome.response.is_success());
        assert!(outcome.refreshed_token.is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://192.168.99.92:8443/api/v1/device_info");
        assert_eq!(requests[0].bearer_token(), Some("tok"));
        assert!(requests[0].headers[AUTHORIZATION].is_sensitive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_carries_body_query_and_headers() {
        let transport = Arc::new(MockTransport::new().reply(200, LOGOUT_BODY));
        let call = ApiCall::post("vlan")
            .with_body(serde_json::json!({"vlan": {"id": 100}}))
            .with_query("unit", "1")
            .with_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("abc"),
            )
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer spoofed"))
            .with_timeout(Duration::from_secs(5));

        switch_core(&transport).call(&call, "tok", &NoCredentials).await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body, Some(serde_json::json!({"vlan": {"id": 100}})));
        assert_eq!(sent.query, vec![("unit".to_string(), "1".to_string())]);
        assert_eq!(sent.headers["x-request-id"], "abc");
        assert_eq!(sent.bearer_token(), Some("tok"));
        assert_eq!(sent.timeout, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_envelope_is_returned_not_raised() {
        let transport = Arc::new(MockTransport::new().reply(
            200,
            r#"{"resp":{"status":"failure","respCode":3,"respMsg":"VLAN in use"}}"#,
        ));
        let outcome = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();
        assert!(!outcome.response.is_success());
        assert_eq!(outcome.response.resp.resp_msg, "VLAN in use");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_success_body_is_not_retried() {
        let transport = Arc::new(MockTransport::new().reply(200, "<html>oops</html>"));
        let err = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::InvalidResponseFormat { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_503_then_succeeds() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(503, "busy")
                .reply(200, DEVICE_INFO_BODY),
        );
        let start = Instant::now();
        let outcome = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();

        assert!(outcome.response.is_success());
        assert_eq!(transport.requests().len(), 2);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1), "{:?}", waited);
        assert!(waited <= Duration::from_millis(1100), "{:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_fails_immediately() {
        let transport = Arc::new(MockTransport::new().reply(
            404,
            r#"{"resp":{"status":"failure","respCode":404,"respMsg":"Not found"}}"#,
        ));
        let err = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.resp_msg(), Some("Not found"));
        assert!(matches!(err, SwitchError::Api { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_transport_error_fails_immediately() {
        let transport = Arc::new(
            MockTransport::new().fail(TransportError::Other("bad request line".into())),
        );
        let err = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Transport(TransportError::Other(_))));
        assert_eq!(transport.requests().len(), 1);
    }

    // Scenario: three consecutive 503s exhaust the default budget after
    // waits of about 1s and 2s.
    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_last_error() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(503, "busy")
                .reply(503, "busy")
                .reply(503, "still busy"),
        );
        let start = Instant::now();
        let err = switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap_err();

        match &err {
            SwitchError::RequestFailedAfterRetries { attempts, last } => {
                assert_eq!(*attempts, 3);
                assert_eq!(last.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
                assert!(last.to_string().contains("still busy"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.requests().len(), 3);

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3), "{:?}", waited);
        assert!(waited <= Duration::from_millis(3300), "{:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped_by_max_delay() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(500, "")
                .reply(500, "")
                .reply(500, "")
                .reply(200, LOGOUT_BODY),
        );
        let policy = RetryPolicy::default()
            .with_max_attempts(4)
            .with_max_delay(Duration::from_millis(1500))
            .with_jitter_ratio(0.0);
        let start = Instant::now();
        switch_core(&transport)
            .with_policy(policy)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();
        // 1s, then 1.5s twice
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(4010), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_header_is_honoured() {
        let transport = Arc::new(
            MockTransport::new()
                .reply_retry_after(429, "Rate limit exceeded", 5)
                .reply(200, LOGOUT_BODY),
        );
        let start = Instant::now();
        switch_core(&transport)
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    // Scenario: a hung attempt times out and the retry succeeds.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let transport = Arc::new(MockTransport::new().hang().reply(200, DEVICE_INFO_BODY));
        let start = Instant::now();
        let outcome = switch_core(&transport)
            .with_timeout(Duration::from_secs(30))
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap();

        assert!(outcome.response.is_success());
        assert_eq!(transport.requests().len(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(31), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(31_100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_every_attempt_exhausts_budget() {
        let transport = Arc::new(MockTransport::new().hang().hang().hang().hang());
        let err = switch_core(&transport)
            .with_timeout(Duration::from_secs(5))
            .call(&device_info(), "tok", &NoCredentials)
            .await
            .unwrap_err();

        match err {
            SwitchError::RequestFailedAfterRetries { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last,
                    SwitchError::Transport(TransportError::Timeout(d)) if d == Duration::from_secs(5)
                ));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_the_whole_call() {
        let transport = Arc::new(MockTransport::new().hang().hang().hang());
        let start = Instant::now();
        let err = switch_core(&transport)
            .call(
                &device_info().with_deadline(Duration::from_secs(10)),
                "tok",
                &NoCredentials,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::RequestFailedAfterRetries { .. }), "{:?}", err);
        assert!(start.elapsed() <= Duration::from_secs(10));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_backoff_early() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(503, "busy")
                .reply(200, DEVICE_INFO_BODY),
        );
        let err = switch_core(&transport)
            .call(
                &device_info().with_deadline(Duration::from_millis(500)),
                "tok",
                &NoCredentials,
            )
            .await
            .unwrap_err();

        match err {
            SwitchError::RequestFailedAfterRetries { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.remaining(), 1);
    }

    // Scenario: an expired token is replaced once and the call replayed.
    #[tokio::test(start_paused = true)]
    async fn test_401_reauthenticates_and_replays_once() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .reply(200, login_body("fresh"))
                .reply(200, DEVICE_INFO_BODY),
        );
        let outcome = switch_core(&transport)
            .call(&device_info(), "stale", &creds())
            .await
            .unwrap();

        assert!(outcome.response.is_success());
        let refreshed = outcome.refreshed_token.expect("token should be refreshed");
        assert_eq!(refreshed.access_token(), "fresh");

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].bearer_token(), Some("stale"));
        assert!(requests[1].url.ends_with("/api/v1/login"));
        assert_eq!(requests[1].bearer_token(), None);
        assert_eq!(requests[2].bearer_token(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_401_is_an_authentication_error() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .reply(200, LOGIN_BODY)
                .reply(401, UNAUTHORIZED_BODY),
        );
        let err = switch_core(&transport)
            .call(&device_info(), "stale", &creds())
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::Authentication { .. }), "{:?}", err);
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(transport.count("login"), 1);
        assert_eq!(transport.count("device_info"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_without_credentials_is_an_authentication_error() {
        let transport = Arc::new(MockTransport::new().reply(401, UNAUTHORIZED_BODY));
        let err = switch_core(&transport)
            .call(&device_info(), "stale", &NoCredentials)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Authentication { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_relogin_is_an_authentication_error() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .reply(
                    200,
                    r#"{"resp":{"status":"failure","respCode":1,"respMsg":"Invalid username or password"}}"#,
                ),
        );
        let err = switch_core(&transport)
            .call(&device_info(), "stale", &creds())
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::Authentication { .. }));
        assert!(err.to_string().contains("Invalid username or password"));
        assert_eq!(transport.count("device_info"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_after_a_retry_does_not_consume_budget() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(503, "busy")
                .reply(503, "busy")
                .reply(401, UNAUTHORIZED_BODY)
                .reply(200, LOGIN_BODY)
                .reply(200, DEVICE_INFO_BODY),
        );
        let policy = RetryPolicy::default().with_max_attempts(3);
        let outcome = switch_core(&transport)
            .with_policy(policy)
            .call(&device_info(), "stale", &creds())
            .await
            .unwrap();
        assert!(outcome.refreshed_token.is_some());
        assert_eq!(transport.count("device_info"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_reauthentication() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .hang()
                .hang()
                .hang(),
        );
        let start = Instant::now();
        let err = switch_core(&transport)
            .call(
                &device_info().with_deadline(Duration::from_secs(10)),
                "stale",
                &creds(),
            )
            .await
            .unwrap_err();

        match err {
            SwitchError::RequestFailedAfterRetries { last, .. } => {
                assert!(
                    matches!(*last, SwitchError::Transport(TransportError::Timeout(_))),
                    "{:?}",
                    last
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(start.elapsed() <= Duration::from_secs(10), "{:?}", start.elapsed());
        assert_eq!(transport.count("login"), 1);
        assert_eq!(transport.remaining(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauthentication_uses_call_timeout() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .hang()
                .reply(200, login_body("fresh"))
                .reply(200, DEVICE_INFO_BODY),
        );
        let start = Instant::now();
        let outcome = switch_core(&transport)
            .call(
                &device_info().with_timeout(Duration::from_secs(5)),
                "stale",
                &creds(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.refreshed_token.unwrap().access_token(), "fresh");
        let requests = transport.requests();
        assert_eq!(requests[1].timeout, Duration::from_secs(5));
        assert_eq!(transport.count("login"), 2);

        // 5s timeout plus about 1s of backoff
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(6100), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_relogin_is_not_retried() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .reply(429, "Maximum of five login attempts exceeded")
                .reply(429, "Maximum of five login attempts exceeded")
                .reply(429, "Maximum of five login attempts exceeded"),
        );
        let err = switch_core(&transport)
            .call(&device_info(), "stale", &creds())
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchError::Authentication { .. }), "{:?}", err);
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(err.to_string().contains("Maximum of five login attempts"));
        assert_eq!(transport.count("login"), 1);
        assert_eq!(transport.count("device_info"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_deadline_is_ignored() {
        let transport = Arc::new(MockTransport::new().reply(200, DEVICE_INFO_BODY));
        let outcome = switch_core(&transport)
            .call(&device_info().with_deadline(Duration::MAX), "tok", &NoCredentials)
            .await
            .unwrap();
        assert!(outcome.response.is_success());
        assert_eq!(transport.requests()[0].timeout, DEFAULT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_reauthenticate_sees_rejected_token() {
        struct Fixed(AtomicUsize);

        #[async_trait]
        impl Reauthenticate for Fixed {
            async fn reauthenticate(
                &self,
                _core: &ApiCore,
                rejected: &str,
            ) -> Result<AuthToken, SwitchError> {
                assert_eq!(rejected, "stale");
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(AuthToken::new("cached", Duration::from_secs(3600)))
            }
        }

        let transport = Arc::new(
            MockTransport::new()
                .reply(401, UNAUTHORIZED_BODY)
                .reply(200, DEVICE_INFO_BODY),
        );
        let reauth = Fixed(AtomicUsize::new(0));
        let outcome = switch_core(&transport)
            .call_with(&device_info(), "stale", &reauth)
            .await
            .unwrap();

        assert_eq!(reauth.0.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.refreshed_token.unwrap().access_token(), "cached");
        assert_eq!(transport.count("login"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_bad_endpoint_before_dispatch() {
        let transport = Arc::new(MockTransport::new());
        let err = switch_core(&transport)
            .call(&ApiCall::get("https://evil.example/api"), "tok", &NoCredentials)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::InvalidArgument(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_exchange_success() {
        let transport = Arc::new(MockTransport::new().reply(200, LOGIN_BODY));
        let result = switch_core(&transport).login_exchange(&creds()).await.unwrap();

        assert_eq!(result.data.token, TOKEN);
        assert_eq!(result.data.expire, "86400");
        assert_eq!(result.resp.resp_msg, "Operation success");

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.url, "https://192.168.99.92:8443/api/v1/login");
        assert_eq!(
            sent.body,
            Some(serde_json::json!({"login": {"username": "admin", "password": "password123"}}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_returns_token() {
        let transport = Arc::new(MockTransport::new().reply(200, LOGIN_BODY));
        let token = switch_core(&transport).login(&creds()).await.unwrap();
        assert_eq!(token.access_token(), TOKEN);
        assert_eq!(token.expires_in(), Duration::from_secs(86400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_plain_text_refusal() {
        let transport = Arc::new(
            MockTransport::new().reply(200, "Maximum of five login attempts exceeded"),
        );
        let err = switch_core(&transport).login_exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, SwitchError::Authentication { .. }));
        assert!(err.to_string().contains("Maximum of five login attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_refused_with_status() {
        let transport = Arc::new(MockTransport::new().reply(
            403,
            r#"{"resp":{"status":"failure","respCode":1,"respMsg":"Access denied"}}"#,
        ));
        let err = switch_core(&transport).login_exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, SwitchError::Authentication { .. }));
        assert_eq!(err.to_string(), "authentication failed: login failed: Access denied");
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_429_is_a_refusal() {
        let transport = Arc::new(
            MockTransport::new()
                .reply_retry_after(429, "Maximum of five login attempts exceeded", 1)
                .reply(200, LOGIN_BODY),
        );
        let err = switch_core(&transport).login_exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, SwitchError::Authentication { .. }));
        assert_eq!(transport.count("login"), 1);
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_malformed_json_is_a_format_error() {
        let transport = Arc::new(MockTransport::new().reply(200, r#"{"login":{}}"#));
        let err = switch_core(&transport).login_exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, SwitchError::InvalidResponseFormat { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_retries_transient_failures() {
        let transport = Arc::new(
            MockTransport::new()
                .fail(TransportError::Connect("connection refused".into()))
                .reply(200, LOGIN_BODY),
        );
        let token = switch_core(&transport).login(&creds()).await.unwrap();
        assert_eq!(token.access_token(), TOKEN);
        assert_eq!(transport.count("login"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spaces_attempts() {
        let transport = Arc::new(
            MockTransport::new()
                .reply(200, LOGOUT_BODY)
                .reply(200, LOGOUT_BODY)
                .reply(200, LOGOUT_BODY),
        );
        let api = switch_core(&transport).with_rate_limit(2);
        let start = Instant::now();
        for _ in 0..3 {
            api.call(&device_info(), "tok", &NoCredentials).await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1010), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_time() {
        let timeout = Duration::from_secs(30);
        assert_eq!(remaining(None, timeout), Some(timeout));

        let far = Instant::now() + Duration::from_secs(60);
        assert_eq!(remaining(Some(far), timeout), Some(timeout));

        let near = Instant::now() + Duration::from_secs(10);
        assert_eq!(remaining(Some(near), timeout), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(remaining(Some(near), timeout), None);
    }
}
