//! Logout endpoint payload.

use serde::{Deserialize, Serialize};

use super::Payload;

/// The `logout` object; the switch always sends it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {}

impl Payload for LogoutResponse {
    const KEY: &'static str = "logout";
}
