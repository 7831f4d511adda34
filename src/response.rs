//! Response validation for switch API replies.
//!
//! The switch emits valid but unusually formatted JSON (tab indentation,
//! irregular spacing). Validation therefore relies only on a real JSON
//! parser and on the shape of the `resp` envelope, never on the text.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SwitchError;

/// Maximum number of body bytes kept on a format error.
const MAX_RAW_BODY_LEN: usize = 2048;

/// Outcome reported by the switch in the `resp` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RespStatus {
    /// The endpoint performed the operation.
    Success,
    /// The endpoint refused or failed the operation.
    Failure,
}

/// The `resp` envelope present in every switch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// "success" or "failure".
    pub status: RespStatus,
    /// Vendor response code, 0 on success.
    pub resp_code: i64,
    /// Human-readable message.
    pub resp_msg: String,
}

impl ResponseData {
    /// Returns true if the endpoint reported success.
    pub fn is_success(&self) -> bool {
        self.status == RespStatus::Success
    }
}

/// A validated switch response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// The decoded top-level JSON object.
    pub body: Map<String, Value>,
    /// The decoded `resp` envelope.
    pub resp: ResponseData,
    /// Response headers as received.
    pub headers: HeaderMap,
}

impl ApiResponse {
    /// Returns true if the envelope reports success.
    pub fn is_success(&self) -> bool {
        self.resp.is_success()
    }

    /// Extracts and type-checks the endpoint payload stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `SwitchError::InvalidResponseFormat` when the key is missing
    /// or its value does not match `T`.
    pub fn payload<T>(&self, key: &str) -> Result<T, SwitchError>
    where
        T: DeserializeOwned,
    {
        let value = self.body.get(key).ok_or_else(|| {
            SwitchError::invalid_response(
                format!("missing payload key {:?}", key),
                self.raw_json(),
            )
        })?;

        serde_json::from_value(value.clone()).map_err(|e| {
            SwitchError::invalid_response(
                format!("payload {:?} does not match its schema: {}", key, e),
                self.raw_json(),
            )
        })
    }

    /// Like [`payload`](Self::payload), but only when the envelope reports
    /// success; a failure envelope yields `Ok(None)`.
    pub fn success_payload<T>(&self, key: &str) -> Result<Option<T>, SwitchError>
    where
        T: DeserializeOwned,
    {
        if self.is_success() {
            self.payload(key).map(Some)
        } else {
            Ok(None)
        }
    }

    fn raw_json(&self) -> String {
        truncate_raw(&Value::Object(self.body.clone()).to_string())
    }
}

/// Validates a raw response body.
///
/// A `resp.status` of `"failure"` is *not* an error here: the parsed
/// response is returned and the caller decides. Only structural problems
/// are rejected.
///
/// # Errors
///
/// Returns `SwitchError::InvalidResponseFormat` when the body is not JSON,
/// is not an object, or has a missing or mistyped `resp` envelope.
pub fn validate_response(
    status: StatusCode,
    headers: HeaderMap,
    raw: &str,
) -> Result<ApiResponse, SwitchError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        SwitchError::invalid_response(format!("body is not valid JSON: {}", e), truncate_raw(raw))
    })?;

    let Value::Object(body) = value else {
        return Err(SwitchError::invalid_response(
            "top-level JSON value is not an object",
            truncate_raw(raw),
        ));
    };

    let resp_value = body
        .get("resp")
        .ok_or_else(|| SwitchError::invalid_response("missing \"resp\" envelope", truncate_raw(raw)))?;

    if !resp_value.is_object() {
        return Err(SwitchError::invalid_response(
            "\"resp\" envelope is not an object",
            truncate_raw(raw),
        ));
    }

    let resp: ResponseData = serde_json::from_value(resp_value.clone()).map_err(|e| {
        SwitchError::invalid_response(format!("malformed \"resp\" envelope: {}", e), truncate_raw(raw))
    })?;

    tracing::trace!(status = %status, resp_status = ?resp.status, resp_code = resp.resp_code, "Validated switch response");

    Ok(ApiResponse {
        status,
        body,
        resp,
        headers,
    })
}

fn truncate_raw(raw: &str) -> String {
    if raw.len() <= MAX_RAW_BODY_LEN {
        return raw.to_string();
    }
    let mut end = MAX_RAW_BODY_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &raw[..end])
}
