//! Configuration management for the M4300 client.
//!
//! Settings come from `M4300_*` environment variables (a `.env` file is
//! loaded by the binary). Nothing is required for the tool server itself,
//! since each tool call names its own switch; the default switch and its
//! credentials are only needed for the startup connection check.

use std::env;
use std::time::Duration;

use crate::auth::Credentials;
use crate::error::SwitchError;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::switch_url::{SwitchTarget, DEFAULT_PORT};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default request rate ceiling (requests per second).
const DEFAULT_RATE_LIMIT: u32 = 10;

/// Default token refresh margin in seconds.
const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 300;

/// Client settings shared by every session.
///
/// The password is stored but never logged or exposed in error messages.
#[derive(Clone)]
pub struct Config {
    /// Default switch hostname or IP address.
    pub host: Option<String>,

    /// Username for the default switch.
    pub username: Option<String>,

    /// Password for the default switch.
    /// This value must never be logged or included in error messages.
    pub password: Option<String>,

    /// HTTPS port of the default switch.
    pub port: u16,

    /// Whether TLS certificates are verified.
    pub verify_ssl: bool,

    /// Per-attempt request timeout.
    pub timeout: Duration,

    /// Maximum requests per second per session (0 disables limiting).
    pub rate_limit: u32,

    /// Safety margin subtracted from token lifetimes.
    pub token_refresh_margin: Duration,

    /// Attempts per call, including the first.
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            password: None,
            port: DEFAULT_PORT,
            verify_ssl: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            rate_limit: DEFAULT_RATE_LIMIT,
            token_refresh_margin: Duration::from_secs(DEFAULT_TOKEN_REFRESH_MARGIN_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout", &self.timeout)
            .field("rate_limit", &self.rate_limit)
            .field("token_refresh_margin", &self.token_refresh_margin)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `M4300_HOST`, `M4300_USERNAME`, `M4300_PASSWORD`: default switch
    /// - `M4300_PORT` (8443), `M4300_VERIFY_SSL` (true), `M4300_TIMEOUT` (30 s)
    /// - `M4300_RATE_LIMIT` (10/s), `M4300_TOKEN_REFRESH_MARGIN` (300 s)
    /// - `M4300_MAX_RETRIES` (3 attempts)
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::Config` if a value fails to parse.
    ///
    /// # Example
    ///
    /// ```ignore
    /// dotenvy::dotenv().ok();
    /// let config = Config::from_env()?;
    /// ```
    pub fn from_env() -> Result<Self, SwitchError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SwitchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let port = match get("M4300_PORT") {
            Some(raw) => parse_port(&raw)?,
            None => defaults.port,
        };

        let verify_ssl = match get("M4300_VERIFY_SSL") {
            Some(raw) => parse_bool("M4300_VERIFY_SSL", &raw)?,
            None => defaults.verify_ssl,
        };

        let timeout = match get("M4300_TIMEOUT") {
            Some(raw) => {
                let secs: u64 = parse_number("M4300_TIMEOUT", &raw)?;
                if secs == 0 {
                    return Err(SwitchError::invalid_config(
                        "M4300_TIMEOUT must be at least 1 second",
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.timeout,
        };

        let rate_limit = match get("M4300_RATE_LIMIT") {
            Some(raw) => parse_number("M4300_RATE_LIMIT", &raw)?,
            None => defaults.rate_limit,
        };

        let token_refresh_margin = match get("M4300_TOKEN_REFRESH_MARGIN") {
            Some(raw) => Duration::from_secs(parse_number("M4300_TOKEN_REFRESH_MARGIN", &raw)?),
            None => defaults.token_refresh_margin,
        };

        let max_attempts = match get("M4300_MAX_RETRIES") {
            Some(raw) => {
                let attempts: u32 = parse_number("M4300_MAX_RETRIES", &raw)?;
                if attempts == 0 {
                    return Err(SwitchError::invalid_config(
                        "M4300_MAX_RETRIES must be at least 1",
                    ));
                }
                attempts
            }
            None => defaults.max_attempts,
        };

        Ok(Config {
            host: get("M4300_HOST"),
            username: get("M4300_USERNAME"),
            password: lookup("M4300_PASSWORD").filter(|v| !v.is_empty()),
            port,
            verify_ssl,
            timeout,
            rate_limit,
            token_refresh_margin,
            max_attempts,
        })
    }

    /// Retry policy derived from `max_attempts`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_attempts)
    }

    /// The default switch, if `M4300_HOST` is set.
    pub fn default_target(&self) -> Result<Option<SwitchTarget>, SwitchError> {
        self.host
            .as_deref()
            .map(|host| SwitchTarget::new(host, self.port))
            .transpose()
    }

    /// Credentials for the default switch.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::Config` if either variable is missing.
    pub fn switch_credentials(&self) -> Result<Credentials, SwitchError> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| SwitchError::missing_env("M4300_USERNAME"))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| SwitchError::missing_env("M4300_PASSWORD"))?;
        Credentials::new(username, password)
    }
}

fn parse_port(raw: &str) -> Result<u16, SwitchError> {
    match raw.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err(SwitchError::invalid_config(format!(
            "M4300_PORT must be between 1 and 65535, got {:?}",
            raw
        ))),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, SwitchError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SwitchError::invalid_config(format!(
            "{} must be true or false, got {:?}",
            name, raw
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, SwitchError> {
    raw.parse().map_err(|_| {
        SwitchError::invalid_config(format!("{} must be a non-negative integer, got {:?}", name, raw))
    })
}
