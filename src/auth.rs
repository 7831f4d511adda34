//! Bearer-token state for one switch session.
//!
//! `AuthState` is owned by a single session. Reads are lock-free with
//! respect to refresh; refreshes are serialized by an async mutex with a
//! re-check after acquiring it, so concurrent callers that all see an
//! expired token trigger exactly one login.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SwitchError;

/// Default safety margin subtracted from a token's lifetime.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Token type sent in the `Authorization` header.
pub const TOKEN_TYPE: &str = "Bearer";

/// A bearer token issued by a successful login exchange.
///
/// Tokens are immutable; a refresh replaces the whole value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    access_token: String,
    issued_at: Instant,
    expires_in: Duration,
}

impl AuthToken {
    /// Creates a token issued now.
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        Self::issued_at(access_token, Instant::now(), expires_in)
    }

    /// Creates a token with an explicit issue time.
    pub fn issued_at(access_token: impl Into<String>, issued_at: Instant, expires_in: Duration) -> Self {
        Self {
            access_token: access_token.into(),
            issued_at,
            expires_in,
        }
    }

    /// The opaque token string.
    /// SECURITY: never log this value.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Always "Bearer".
    pub fn token_type(&self) -> &'static str {
        TOKEN_TYPE
    }

    /// Lifetime announced by the switch.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// When the token was obtained.
    pub fn issued(&self) -> Instant {
        self.issued_at
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("{} {}", TOKEN_TYPE, self.access_token)
    }

    /// True once `now > issued_at + expires_in - margin`.
    ///
    /// A lifetime too large to represent as an instant never expires.
    pub fn is_expired(&self, margin: Duration) -> bool {
        let usable = self.expires_in.saturating_sub(margin);
        match self.issued_at.checked_add(usable) {
            Some(expiry) => Instant::now() > expiry,
            None => false,
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Username and password used for a login exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    /// SECURITY: never log this value.
    pub password: String,
}

impl Credentials {
    /// Creates credentials, rejecting empty fields.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, SwitchError> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return Err(SwitchError::invalid_argument("username is required"));
        }
        if password.is_empty() {
            return Err(SwitchError::invalid_argument("password is required"));
        }
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Capability that produces credentials on demand for a re-login.
pub trait CredentialProvider: Send + Sync {
    /// Returns the credentials to log in with.
    fn credentials(&self) -> Result<Credentials, SwitchError>;
}

impl CredentialProvider for Credentials {
    fn credentials(&self) -> Result<Credentials, SwitchError> {
        Ok(self.clone())
    }
}

/// Adapts a closure into a [`CredentialProvider`].
pub struct CredentialFn<F>(pub F);

impl<F> CredentialProvider for CredentialFn<F>
where
    F: Fn() -> Result<Credentials, SwitchError> + Send + Sync,
{
    fn credentials(&self) -> Result<Credentials, SwitchError> {
        (self.0)()
    }
}

/// Provider for calls that must never re-login (e.g. logout with a caller token).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credentials(&self) -> Result<Credentials, SwitchError> {
        Err(SwitchError::authentication(
            "token rejected and no credentials are available to refresh it",
        ))
    }
}

/// The current token of one session.
#[derive(Debug)]
pub struct AuthState {
    current: RwLock<Option<Arc<AuthToken>>>,
    refresh: Mutex<()>,
    margin: Duration,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

impl AuthState {
    /// Creates an empty state with the given refresh margin.
    pub fn new(margin: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh: Mutex::new(()),
            margin,
        }
    }

    /// The refresh margin in use.
    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// The held token, expired or not.
    pub fn current(&self) -> Option<Arc<AuthToken>> {
        self.read().clone()
    }

    /// The held token if it is still usable.
    pub fn valid(&self) -> Option<Arc<AuthToken>> {
        self.read()
            .as_ref()
            .filter(|token| !token.is_expired(self.margin))
            .cloned()
    }

    /// Returns a usable token, logging in if none is held or it expired.
    ///
    /// Only one login runs at a time; callers queued behind it reuse its
    /// result instead of logging in again.
    pub async fn get_valid_token<F, Fut>(&self, login: F) -> Result<Arc<AuthToken>, SwitchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthToken, SwitchError>>,
    {
        if let Some(token) = self.valid() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.valid() {
            tracing::debug!("Token refreshed by a concurrent caller, reusing it");
            return Ok(token);
        }

        self.login_locked(login).await
    }

    /// Replaces a token the switch rejected with HTTP 401.
    ///
    /// If another caller already replaced `rejected`, its token is reused.
    pub async fn refresh_rejected<F, Fut>(
        &self,
        rejected: &str,
        login: F,
    ) -> Result<Arc<AuthToken>, SwitchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthToken, SwitchError>>,
    {
        let _guard = self.refresh.lock().await;
        if let Some(token) = self.valid() {
            if token.access_token() != rejected {
                tracing::debug!("Rejected token already replaced, reusing the new one");
                return Ok(token);
            }
        }

        self.login_locked(login).await
    }

    async fn login_locked<F, Fut>(&self, login: F) -> Result<Arc<AuthToken>, SwitchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthToken, SwitchError>>,
    {
        match login().await {
            Ok(token) => {
                let token = Arc::new(token);
                *self.write() = Some(Arc::clone(&token));
                Ok(token)
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Stores a token obtained elsewhere (e.g. reported by the API core).
    pub fn replace(&self, token: AuthToken) -> Arc<AuthToken> {
        let token = Arc::new(token);
        *self.write() = Some(Arc::clone(&token));
        token
    }

    /// Drops the held token so the next call starts with a fresh login.
    pub fn invalidate(&self) {
        *self.write() = None;
    }

    // A poisoned lock only means a writer panicked between two plain
    // assignments, so the stored value is still coherent.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<AuthToken>>> {
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<AuthToken>>> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }
}
