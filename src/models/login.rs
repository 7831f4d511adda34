//! Login endpoint request and payload.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::Payload;
use crate::auth::{AuthToken, Credentials};
use crate::error::SwitchError;

/// Body of `POST /api/v1/login`.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    login: LoginFields<'a>,
}

#[derive(Serialize)]
struct LoginFields<'a> {
    username: &'a str,
    password: &'a str,
}

impl<'a> LoginRequest<'a> {
    /// Builds the request body from credentials.
    pub fn new(credentials: &'a Credentials) -> Self {
        Self {
            login: LoginFields {
                username: &credentials.username,
                password: &credentials.password,
            },
        }
    }
}

/// The `login` object of a successful login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests.
    pub token: String,

    /// Token lifetime in seconds, string-encoded (typically "86400").
    ///
    /// Some firmware sends a bare integer under `expires`; both are accepted.
    #[serde(alias = "expires", deserialize_with = "string_or_integer")]
    pub expire: String,
}

impl Payload for LoginResponse {
    const KEY: &'static str = "login";
}

impl LoginResponse {
    /// Parses `expire` as a number of seconds.
    pub fn expires_in(&self) -> Result<Duration, SwitchError> {
        self.expire
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                SwitchError::invalid_response(
                    format!("login expiry is not a number of seconds: {:?}", self.expire),
                    "",
                )
            })
    }

    /// Converts the payload into a token issued now.
    pub fn to_token(&self) -> Result<AuthToken, SwitchError> {
        if self.token.is_empty() {
            return Err(SwitchError::invalid_response("login returned an empty token", ""));
        }
        Ok(AuthToken::new(self.token.clone(), self.expires_in()?))
    }
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token", &"[REDACTED]")
            .field("expire", &self.expire)
            .finish()
    }
}

fn string_or_integer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
