//! Data models for the switch REST API.
//!
//! Each endpoint wraps its payload next to the shared `resp` envelope;
//! these types describe the payloads and the request bodies.

mod common;
mod device_info;
mod login;
mod logout;

pub use common::*;
pub use device_info::*;
pub use login::*;
pub use logout::*;
