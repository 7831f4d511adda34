//! Tool input parameter structs for MCP tools.
//!
//! Field names are camelCase on the wire (`baseUrl`), matching the switch's
//! own JSON. All input structs implement `sanitize()`, which trims
//! whitespace from string fields; passwords and tokens are left untouched.

use std::fmt;

use rmcp::schemars::{self, JsonSchema};
use serde::Deserialize;

/// Helper function to trim an optional string.
fn trim_option(s: &Option<String>) -> Option<String> {
    s.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Input parameters for the login tool.
#[derive(Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    /// Switch address, e.g. "https://192.168.99.92:8443" or "192.168.99.92".
    pub base_url: String,

    /// Switch username.
    pub username: String,

    /// Switch password.
    pub password: String,
}

impl LoginInput {
    /// Sanitizes input by trimming whitespace from the address and username.
    #[must_use]
    pub fn sanitize(self) -> Self {
        Self {
            base_url: self.base_url.trim().to_string(),
            username: self.username.trim().to_string(),
            password: self.password,
        }
    }
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Input parameters for the logout tool.
#[derive(Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutInput {
    /// Switch address.
    pub base_url: String,

    /// Token returned by the login tool.
    pub token: String,
}

impl LogoutInput {
    /// Sanitizes input by trimming whitespace from all string fields.
    #[must_use]
    pub fn sanitize(self) -> Self {
        Self {
            base_url: self.base_url.trim().to_string(),
            token: self.token.trim().to_string(),
        }
    }
}

impl fmt::Debug for LogoutInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutInput")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Input parameters for the device_info tool.
///
/// With `username` and `password` the tool can log in again if `token` has
/// expired; the new token is returned in the result.
#[derive(Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfoInput {
    /// Switch address.
    pub base_url: String,

    /// Token returned by the login tool.
    pub token: String,

    /// Username for re-login on an expired token.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for re-login on an expired token.
    #[serde(default)]
    pub password: Option<String>,
}

impl DeviceInfoInput {
    /// Sanitizes input by trimming whitespace from all string fields but the
    /// password.
    #[must_use]
    pub fn sanitize(self) -> Self {
        Self {
            base_url: self.base_url.trim().to_string(),
            token: self.token.trim().to_string(),
            username: trim_option(&self.username),
            password: self.password.filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Debug for DeviceInfoInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfoInput")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
