//! m4300 - MCP server for NETGEAR M4300 switches
//!
//! This binary runs as an MCP server using stdio transport. Tools take the
//! switch address and credentials as arguments, so no configuration is
//! required.
//!
//! # Configuration
//!
//! Optional environment variables (or a `.env` file):
//!
//! - `M4300_HOST`, `M4300_USERNAME`, `M4300_PASSWORD`: switch to check at startup
//! - `M4300_VERIFY_SSL`: set to `false` for the switch's self-signed certificate
//! - `RUST_LOG`: log level (e.g., `m4300=debug`)

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::{fmt, EnvFilter};

use m4300::{client, config, server, transport};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries MCP JSON-RPC; logs go to stderr.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("m4300=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting m4300 MCP server v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    let transport: Arc<dyn transport::Transport> = Arc::new(
        transport::ReqwestTransport::new(&config).context("Failed to create HTTP client")?,
    );

    if config.host.is_some() {
        tracing::info!("Testing connection to the default switch...");
        let checked = match client::SwitchClient::from_config(&config, Arc::clone(&transport)) {
            Ok(session) => session.test_connection().await,
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            let password = config.password.as_deref().unwrap_or_default();
            tracing::error!(error = %e.sanitized_display(&[password]), "Connection test failed");
            // Tools name their own switch, so the server is still useful.
            tracing::warn!(
                "Server will start but the default switch could not be reached. \
                 Check M4300_HOST, credentials and network connectivity."
            );
        }
    }

    let server = server::SwitchServer::new(config, transport);

    tracing::info!("Server initialized, starting stdio transport");

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("serving error: {:?}", e);
        })
        .context("Failed to start server")?;

    tracing::info!("Server running, waiting for requests");

    service
        .waiting()
        .await
        .context("Server error during operation")?;

    tracing::info!("Server shutting down");

    Ok(())
}
