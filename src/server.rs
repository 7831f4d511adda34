//! MCP server implementation for the M4300 tools.
//!
//! This module defines the `SwitchServer` struct that implements the MCP
//! `ServerHandler` trait. Each tool names its switch through `baseUrl`, runs
//! one endpoint helper and returns its result as JSON. Failures come back as
//! a JSON error object, never as a raw transport error.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Serialize;

use crate::api_core::ApiCore;
use crate::auth::{CredentialProvider, Credentials, NoCredentials};
use crate::config::Config;
use crate::endpoints;
use crate::error::SwitchError;
use crate::models::{ApiResult, DeviceInfo};
use crate::switch_url::SwitchTarget;
use crate::tools::{DeviceInfoInput, LoginInput, LogoutInput};
use crate::transport::{RateLimiter, Transport};

/// The M4300 MCP server.
#[derive(Clone)]
pub struct SwitchServer {
    /// Settings applied to every call.
    config: Config,
    /// Shared HTTP transport (one connection pool for all switches).
    transport: Arc<dyn Transport>,
    /// Rate limit shared by all tool calls.
    limiter: Arc<RateLimiter>,
    /// Tool router for MCP tool dispatch.
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SwitchServer {
    /// Creates a new server instance.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let limiter = Arc::new(RateLimiter::per_second(config.rate_limit));
        Self {
            config,
            transport,
            limiter,
            tool_router: Self::tool_router(),
        }
    }

    /// A simple ping tool to verify the server is running.
    #[tool(description = "Test connectivity to the M4300 MCP server. Returns 'pong' if the server is running correctly.")]
    fn ping(&self) -> String {
        tracing::debug!("ping tool called");
        "pong".to_string()
    }

    /// Log in to a switch and return its bearer token.
    #[tool(description = "Log in to a NETGEAR M4300 switch. Takes baseUrl (e.g. https://192.168.99.92:8443), username and password. Returns the token and its lifetime in seconds.")]
    async fn login(&self, Parameters(input): Parameters<LoginInput>) -> Result<String, String> {
        let input = input.sanitize();
        tracing::debug!(?input, "login tool called");
        let secrets = [input.password.as_str()];

        let result = async {
            let core = self.core_for(&input.base_url)?;
            let credentials = Credentials::new(input.username.as_str(), input.password.as_str())?;
            endpoints::login(&core, &credentials).await
        }
        .await
        .map_err(|e| tool_error("login", &e, &secrets))?;

        to_json(&result).map_err(|e| tool_error("login", &e, &secrets))
    }

    /// Invalidate a token on a switch.
    #[tool(description = "Log out of a NETGEAR M4300 switch, invalidating the token. Takes baseUrl and the token returned by login.")]
    async fn logout(&self, Parameters(input): Parameters<LogoutInput>) -> Result<String, String> {
        let input = input.sanitize();
        tracing::debug!(?input, "logout tool called");
        let secrets = [input.token.as_str()];

        let result = async {
            let core = self.core_for(&input.base_url)?;
            endpoints::logout(&core, &input.token).await
        }
        .await
        .map_err(|e| tool_error("logout", &e, &secrets))?;

        to_json(&result).map_err(|e| tool_error("logout", &e, &secrets))
    }

    /// Read hardware and status information from a switch.
    #[tool(description = "Get device information from a NETGEAR M4300 switch: model, serial number, firmware, ports, CPU and memory usage, fans and temperatures. Takes baseUrl and token; with username and password an expired token is replaced and the new one returned as refreshedToken.")]
    async fn device_info(
        &self,
        Parameters(input): Parameters<DeviceInfoInput>,
    ) -> Result<String, String> {
        let input = input.sanitize();
        tracing::debug!(?input, "device_info tool called");
        let password = input.password.clone().unwrap_or_default();
        let secrets = [input.token.as_str(), password.as_str()];

        let output = async {
            let core = self.core_for(&input.base_url)?;
            let credentials: Box<dyn CredentialProvider> = match (&input.username, &input.password) {
                (Some(username), Some(password)) => {
                    Box::new(Credentials::new(username.as_str(), password.as_str())?)
                }
                _ => Box::new(NoCredentials),
            };
            let (result, refreshed) =
                endpoints::device_info(&core, &input.token, credentials.as_ref()).await?;
            Ok::<_, SwitchError>(DeviceInfoOutput {
                result,
                refreshed_token: refreshed.map(|token| token.access_token().to_string()),
            })
        }
        .await
        .map_err(|e| tool_error("device_info", &e, &secrets))?;

        to_json(&output).map_err(|e| tool_error("device_info", &e, &secrets))
    }

    /// Builds an API core for the switch at `base_url`.
    fn core_for(&self, base_url: &str) -> Result<ApiCore, SwitchError> {
        let target = SwitchTarget::from_base_url(base_url)?;
        Ok(ApiCore::from_config(Arc::clone(&self.transport), target, &self.config)
            .with_limiter(Arc::clone(&self.limiter)))
    }
}

#[tool_handler]
impl ServerHandler for SwitchServer {
    /// Returns server information for the MCP initialize handshake.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Tools for NETGEAR M4300 switches. Call login with the switch's baseUrl \
                 and credentials to obtain a token, pass it to device_info, and call \
                 logout when done. Start with 'ping' to verify connectivity."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Result of the device_info tool.
#[derive(Serialize)]
struct DeviceInfoOutput {
    #[serde(flatten)]
    result: ApiResult<DeviceInfo>,
    #[serde(rename = "refreshedToken", skip_serializing_if = "Option::is_none")]
    refreshed_token: Option<String>,
}

/// Structured error returned to tool callers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolError {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resp_msg: Option<String>,
}

fn tool_error(tool: &str, error: &SwitchError, secrets: &[&str]) -> String {
    let message = error.sanitized_display(secrets);
    tracing::error!(tool, kind = error.kind(), error = %message, "Tool call failed");

    let body = ToolError {
        error: error.kind(),
        message,
        status: error.status().map(|s| s.as_u16()),
        resp_msg: error
            .resp_msg()
            .map(|m| secrets.iter().fold(m.to_string(), |m, s| SwitchError::sanitize_message(&m, s))),
    };
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.message)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, SwitchError> {
    Ok(serde_json::to_string_pretty(value)?)
}
