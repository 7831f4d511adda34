//! Session-level client for one switch.
//!
//! `SwitchClient` owns the token of a session. It logs in on first use,
//! logs in again shortly before the token expires, and lets the API core
//! replace a token the switch rejects. Concurrent callers share one login.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api_core::{ApiCall, ApiCore, Reauthenticate};
use crate::auth::{AuthState, AuthToken, CredentialProvider, NoCredentials};
use crate::config::Config;
use crate::endpoints::{device_info_result, logout_result, DEVICE_INFO_ENDPOINT, LOGOUT_ENDPOINT};
use crate::error::SwitchError;
use crate::models::{ApiResult, DeviceInfo, LoginResponse, LogoutResponse};
use crate::response::ApiResponse;
use crate::transport::Transport;

/// Authenticated client for one switch.
///
/// Cloning is cheap; clones share the session token.
///
/// # Example
///
/// ```ignore
/// let config = Config::from_env()?;
/// let transport = Arc::new(ReqwestTransport::new(&config)?);
/// let client = SwitchClient::from_config(&config, transport)?;
///
/// let info = client.device_info().await?;
/// println!("{} running {}", info.data.model, info.data.sw_ver);
/// ```
#[derive(Clone)]
pub struct SwitchClient {
    core: ApiCore,
    auth: Arc<AuthState>,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for SwitchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchClient")
            .field("core", &self.core)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl SwitchClient {
    /// Creates a session that logs in with `credentials` when needed.
    pub fn new(core: ApiCore, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            core,
            auth: Arc::new(AuthState::default()),
            credentials,
        }
    }

    /// Creates a session for the default switch named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::Config` if `M4300_HOST` or the credentials are
    /// missing.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, SwitchError> {
        let target = config
            .default_target()?
            .ok_or_else(|| SwitchError::missing_env("M4300_HOST"))?;
        let credentials = config.switch_credentials()?;

        let core = ApiCore::from_config(transport, target, config);
        Ok(Self::new(core, Arc::new(credentials)).with_refresh_margin(config.token_refresh_margin))
    }

    /// Replaces the token refresh margin. Drops any held token.
    pub fn with_refresh_margin(mut self, margin: std::time::Duration) -> Self {
        self.auth = Arc::new(AuthState::new(margin));
        self
    }

    /// The underlying API core.
    pub fn core(&self) -> &ApiCore {
        &self.core
    }

    /// The session's token state.
    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Returns a usable token, logging in first if necessary.
    pub async fn token(&self) -> Result<Arc<AuthToken>, SwitchError> {
        self.auth.get_valid_token(|| self.fresh_login()).await
    }

    /// Performs an authenticated call.
    ///
    /// An authentication failure drops the session token, so the next call
    /// starts over with a login.
    pub async fn call(&self, call: &ApiCall) -> Result<ApiResponse, SwitchError> {
        let token = self.token().await?;
        let reauth = SessionReauth { client: self };

        match self.core.call_with(call, token.access_token(), &reauth).await {
            Ok(outcome) => {
                if outcome.refreshed_token.is_some() {
                    tracing::debug!(endpoint = call.endpoint(), "Call succeeded with a refreshed token");
                }
                Ok(outcome.response)
            }
            Err(e @ SwitchError::Authentication { .. }) => {
                self.auth.invalidate();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Logs in explicitly and keeps the resulting token.
    pub async fn login(&self) -> Result<ApiResult<LoginResponse>, SwitchError> {
        let credentials = self.credentials.credentials()?;
        let result = self.core.login_exchange(&credentials).await?;
        self.auth.replace(result.data.to_token()?);
        Ok(result)
    }

    /// Logs out and drops the session token.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::InvalidArgument` if the session holds no token.
    pub async fn logout(&self) -> Result<ApiResult<LogoutResponse>, SwitchError> {
        let token = self
            .auth
            .current()
            .ok_or_else(|| SwitchError::invalid_argument("not logged in"))?;

        let outcome = self
            .core
            .call(&ApiCall::post(LOGOUT_ENDPOINT), token.access_token(), &NoCredentials)
            .await;
        self.auth.invalidate();

        let result = logout_result(&outcome?.response)?;
        tracing::info!(host = %self.core.target().host, "Logged out of switch");
        Ok(result)
    }

    /// Fetches device information.
    pub async fn device_info(&self) -> Result<ApiResult<DeviceInfo>, SwitchError> {
        let response = self.call(&ApiCall::get(DEVICE_INFO_ENDPOINT)).await?;
        device_info_result(&response)
    }

    /// Verifies that the switch is reachable and accepts the credentials by
    /// logging in and out again.
    pub async fn test_connection(&self) -> Result<(), SwitchError> {
        tracing::debug!(host = %self.core.target().host, "Testing connection to switch");

        self.token().await?;
        self.logout().await?;

        tracing::info!("Connection test successful");
        Ok(())
    }

    async fn fresh_login(&self) -> Result<AuthToken, SwitchError> {
        let credentials = self.credentials.credentials()?;
        self.core.login(&credentials).await
    }
}

/// Routes the core's re-authentication through the session, so concurrent
/// 401s share one login.
struct SessionReauth<'a> {
    client: &'a SwitchClient,
}

#[async_trait]
impl Reauthenticate for SessionReauth<'_> {
    async fn reauthenticate(
        &self,
        _core: &ApiCore,
        rejected: &str,
    ) -> Result<AuthToken, SwitchError> {
        let token = self
            .client
            .auth
            .refresh_rejected(rejected, || self.client.fresh_login())
            .await?;
        Ok(AuthToken::clone(&token))
    }
}
