//! Types shared by every endpoint helper.

use serde::Serialize;

use crate::error::SwitchError;
use crate::response::{ApiResponse, ResponseData};

/// Payload stored under a fixed key of the response object.
pub trait Payload: serde::de::DeserializeOwned {
    /// Key of the payload in the response object (e.g. `"deviceInfo"`).
    const KEY: &'static str;
}

/// Uniform helper result: endpoint payload plus the response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResult<T> {
    /// Endpoint-specific data.
    pub data: T,
    /// Status envelope as reported by the switch.
    pub resp: ResponseData,
}

impl<T: Payload> ApiResult<T> {
    /// Converts a validated response into a typed result.
    ///
    /// A failure envelope becomes an error built by `on_failure` from the
    /// switch's message; a success envelope whose payload does not match
    /// `T` is `SwitchError::InvalidResponseFormat`.
    pub fn from_response<F>(response: &ApiResponse, on_failure: F) -> Result<Self, SwitchError>
    where
        F: FnOnce(&ResponseData) -> SwitchError,
    {
        match response.success_payload::<T>(T::KEY)? {
            Some(data) => Ok(Self {
                data,
                resp: response.resp.clone(),
            }),
            None => Err(on_failure(&response.resp)),
        }
    }
}
