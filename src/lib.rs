//! # m4300
//!
//! A resilient client for the NETGEAR M4300 switch REST API, plus an MCP
//! (Model Context Protocol) server exposing switch operations as tools.
//!
//! ## Features
//!
//! - **Authentication**: bearer tokens from `POST /api/v1/login`, refreshed
//!   before they expire and replaced once when the switch answers 401
//! - **Retry**: exponential backoff with jitter for timeouts, connection
//!   failures and HTTP 408/429/500/502/503/504, honouring `Retry-After`
//! - **Validation**: replies are checked by shape, not by text, since the
//!   switch emits tab-indented, irregularly spaced JSON
//! - **Security**: passwords and tokens are never logged or exposed in
//!   error messages
//!
//! ## Architecture
//!
//! - [`switch_url`] - HTTPS URL construction and validation
//! - [`response`] - `resp` envelope validation
//! - [`auth`] - tokens, credentials and per-session token state
//! - [`retry`] - backoff policy and per-call retry bookkeeping
//! - [`transport`] - the HTTP seam and rate limiting
//! - [`api_core`] - the request execution state machine
//! - [`endpoints`] - stateless login, logout and device-info helpers
//! - [`client`] - a long-lived session for one switch
//! - [`server`] and [`tools`] - the MCP tool server
//! - [`config`], [`error`], [`models`]
//!
//! ## Configuration
//!
//! The tool server needs no configuration; each tool call names its switch.
//! `M4300_HOST`, `M4300_USERNAME` and `M4300_PASSWORD` enable a connection
//! check at startup. See [`config::Config::from_env`] for the full list.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use m4300::client::SwitchClient;
//! use m4300::config::Config;
//! use m4300::transport::ReqwestTransport;
//!
//! async fn example() -> Result<(), m4300::error::SwitchError> {
//!     let config = Config::from_env()?;
//!     let transport = Arc::new(ReqwestTransport::new(&config)?);
//!     let client = SwitchClient::from_config(&config, transport)?;
//!
//!     let info = client.device_info().await?;
//!     println!("{} ({}) up {}", info.data.model, info.data.serial_number, info.data.up_time);
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api_core;
pub mod auth;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod response;
pub mod retry;
pub mod server;
pub mod switch_url;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod test_support;
