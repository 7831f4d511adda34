//! Per-endpoint helpers: thin wrappers that call the API core and reshape
//! the response into an [`ApiResult`].
//!
//! These take the token explicitly and keep nothing between calls. A
//! long-lived session should use [`SwitchClient`](crate::client::SwitchClient)
//! instead.

use crate::api_core::{ApiCall, ApiCore};
use crate::auth::{AuthToken, CredentialProvider, Credentials, NoCredentials};
use crate::error::SwitchError;
use crate::models::{ApiResult, DeviceInfo, LoginResponse, LogoutResponse};
use crate::response::ApiResponse;

/// `POST /api/v1/logout`.
pub const LOGOUT_ENDPOINT: &str = "logout";

/// `GET /api/v1/device_info`.
pub const DEVICE_INFO_ENDPOINT: &str = "device_info";

/// Logs in and returns the token payload with its envelope.
pub async fn login(
    core: &ApiCore,
    credentials: &Credentials,
) -> Result<ApiResult<LoginResponse>, SwitchError> {
    core.login_exchange(credentials).await
}

/// Invalidates `token` on the switch.
///
/// A rejected token is not refreshed: there is nothing to log out of.
pub async fn logout(core: &ApiCore, token: &str) -> Result<ApiResult<LogoutResponse>, SwitchError> {
    require_token(token)?;
    let outcome = core
        .call(&ApiCall::post(LOGOUT_ENDPOINT), token, &NoCredentials)
        .await?;
    logout_result(&outcome.response)
}

/// Fetches device information.
///
/// If the switch rejects `token` and `credentials` can supply a login, the
/// replacement token is returned alongside the result.
pub async fn device_info(
    core: &ApiCore,
    token: &str,
    credentials: &dyn CredentialProvider,
) -> Result<(ApiResult<DeviceInfo>, Option<AuthToken>), SwitchError> {
    require_token(token)?;
    let outcome = core
        .call(&ApiCall::get(DEVICE_INFO_ENDPOINT), token, credentials)
        .await?;
    let result = device_info_result(&outcome.response)?;
    Ok((result, outcome.refreshed_token))
}

pub(crate) fn logout_result(response: &ApiResponse) -> Result<ApiResult<LogoutResponse>, SwitchError> {
    ApiResult::from_response(response, |resp| SwitchError::rejected("logout", resp))
}

pub(crate) fn device_info_result(response: &ApiResponse) -> Result<ApiResult<DeviceInfo>, SwitchError> {
    ApiResult::from_response(response, |resp| SwitchError::rejected("device_info", resp))
}

fn require_token(token: &str) -> Result<(), SwitchError> {
    if token.trim().is_empty() {
        return Err(SwitchError::invalid_argument("token is required"));
    }
    Ok(())
}
