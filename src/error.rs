//! Error types for the M4300 client.
//!
//! `SwitchError` is the closed set of failures a caller of the API core can
//! observe. Transport-level failures are modelled separately as
//! `TransportError` so that test transports can produce them without a real
//! socket.
//!
//! # Security
//!
//! Bearer tokens and passwords must never reach logs or tool responses.
//! Use `sanitized_display()` whenever an error leaves the library.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::response::ResponseData;

/// Failure of a single HTTP dispatch, before any status code was received.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The attempt exceeded its connect/read timeout or the caller's deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The switch could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure (malformed request, body read error).
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts and connection failures are transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }

    /// Maps a reqwest error onto the transport taxonomy.
    pub(crate) fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(timeout)
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Other(error.to_string())
        }
    }
}

/// Body carried by a non-success HTTP status.
///
/// The switch usually answers with a JSON envelope, but rate limiting and
/// some authentication failures come back as plain text.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// Parsed JSON body.
    Json(serde_json::Value),
    /// Raw text that did not parse as JSON.
    Text(String),
}

impl ErrorBody {
    /// Best-effort parse of a response body.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => ErrorBody::Json(value),
            Err(_) => ErrorBody::Text(raw.to_string()),
        }
    }

    /// The `resp.respMsg` field, when the body is a JSON envelope.
    pub fn resp_msg(&self) -> Option<&str> {
        match self {
            ErrorBody::Json(value) => value.get("resp")?.get("respMsg")?.as_str(),
            ErrorBody::Text(_) => None,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(msg) = self.resp_msg() {
            return f.write_str(msg);
        }
        match self {
            ErrorBody::Json(value) => write!(f, "{}", value),
            ErrorBody::Text(text) if text.trim().is_empty() => f.write_str("<empty body>"),
            ErrorBody::Text(text) => f.write_str(text.trim()),
        }
    }
}

/// Unified error type for all switch operations.
#[derive(Error, Debug)]
pub enum SwitchError {
    /// Configuration error - missing or invalid environment variables.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input to the URL builder or to an endpoint helper.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The body failed to parse as JSON or lacked the `resp` envelope.
    #[error("invalid response format: {reason}")]
    InvalidResponseFormat {
        /// What was wrong with the body.
        reason: String,
        /// The offending body text.
        raw: String,
    },

    /// Obtaining or using fresh credentials failed.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human-readable reason (e.g. the switch's `respMsg`).
        message: String,
        /// Underlying failure of the login exchange, if any.
        #[source]
        source: Option<Box<SwitchError>>,
    },

    /// The switch answered with a status the client does not retry.
    #[error("HTTP {status}: {body}")]
    Api {
        /// The HTTP status code returned.
        status: StatusCode,
        /// Parsed JSON body, or raw text when it was not JSON.
        body: ErrorBody,
    },

    /// Every attempt allowed by the retry policy failed.
    #[error("request failed after {attempts} attempt(s): {last}")]
    RequestFailedAfterRetries {
        /// Number of attempts that were dispatched.
        attempts: u32,
        /// The error observed on the final attempt.
        #[source]
        last: Box<SwitchError>,
    },

    /// The switch answered with a well-formed `"failure"` envelope.
    #[error("switch rejected {operation}: {resp_msg} (code {resp_code})")]
    Rejected {
        /// The helper operation, e.g. "logout".
        operation: &'static str,
        /// Vendor response code.
        resp_code: i64,
        /// Vendor message.
        resp_msg: String,
    },

    /// Transport failure that is not worth retrying.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// HTTP client initialization failed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// JSON serialization failed.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwitchError {
    /// Creates a configuration error for a missing environment variable.
    pub fn missing_env(var_name: &str) -> Self {
        SwitchError::Config(format!(
            "missing required environment variable: {}",
            var_name
        ))
    }

    /// Creates a configuration error for an invalid value.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        SwitchError::Config(message.into())
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SwitchError::InvalidArgument(message.into())
    }

    /// Creates a response-format error carrying the raw body.
    pub fn invalid_response(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        SwitchError::InvalidResponseFormat {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Creates an authentication error without an underlying cause.
    pub fn authentication(message: impl Into<String>) -> Self {
        SwitchError::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an authentication error wrapping the failure that caused it.
    pub fn authentication_caused_by(message: impl Into<String>, cause: SwitchError) -> Self {
        SwitchError::Authentication {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Creates an API error from a status and its raw body.
    pub fn api(status: StatusCode, raw_body: &str) -> Self {
        SwitchError::Api {
            status,
            body: ErrorBody::parse(raw_body),
        }
    }

    /// Creates a rejection error from a failure envelope.
    pub fn rejected(operation: &'static str, resp: &ResponseData) -> Self {
        SwitchError::Rejected {
            operation,
            resp_code: resp.resp_code,
            resp_msg: resp.resp_msg.clone(),
        }
    }

    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// Retryable errors are timeouts, connection failures and HTTP
    /// 408/429/500/502/503/504.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SwitchError::Transport(e) => e.is_retryable(),
            SwitchError::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// The HTTP status behind this error, looking through retry exhaustion.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SwitchError::Api { status, .. } => Some(*status),
            SwitchError::RequestFailedAfterRetries { last, .. } => last.status(),
            SwitchError::Authentication {
                source: Some(cause),
                ..
            } => cause.status(),
            _ => None,
        }
    }

    /// The switch's `respMsg`, when one was received.
    #[must_use]
    pub fn resp_msg(&self) -> Option<&str> {
        match self {
            SwitchError::Api { body, .. } => body.resp_msg(),
            SwitchError::Rejected { resp_msg, .. } => Some(resp_msg),
            SwitchError::RequestFailedAfterRetries { last, .. } => last.resp_msg(),
            SwitchError::Authentication {
                source: Some(cause),
                ..
            } => cause.resp_msg(),
            _ => None,
        }
    }

    /// Stable machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchError::Config(_) => "configuration",
            SwitchError::InvalidArgument(_) => "invalid_argument",
            SwitchError::InvalidResponseFormat { .. } => "invalid_response_format",
            SwitchError::Authentication { .. } => "authentication",
            SwitchError::Api { .. } => "api",
            SwitchError::RequestFailedAfterRetries { .. } => "request_failed_after_retries",
            SwitchError::Rejected { .. } => "rejected",
            SwitchError::Transport(_) => "transport",
            SwitchError::HttpClient(_) => "http_client",
            SwitchError::Serialization(_) => "serialization",
        }
    }

    /// Replaces every occurrence of `secret` in `message` with `[REDACTED]`.
    #[must_use]
    pub fn sanitize_message(message: &str, secret: &str) -> String {
        if secret.is_empty() {
            return message.to_string();
        }
        message.replace(secret, "[REDACTED]")
    }

    /// Display message with all given secrets redacted.
    ///
    /// Use this whenever an error is logged or returned to a tool caller.
    #[must_use]
    pub fn sanitized_display(&self, secrets: &[&str]) -> String {
        secrets
            .iter()
            .fold(self.to_string(), |message, secret| {
                Self::sanitize_message(&message, secret)
            })
    }
}

/// HTTP statuses the retry controller treats as transient.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}
