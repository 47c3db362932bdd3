//! mail-latest-rs: IMAP connection test and latest-message HTTP service
//!
//! Given IMAP credentials in a JSON request, the service either verifies
//! that it can log in and open INBOX, or returns a summary (subject,
//! sender, date, preview) of the most recent INBOX message. Every request
//! uses its own short-lived, read-only IMAP session; nothing is stored.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and HTTP serving
//! - [`config`]: Environment-driven listener, CORS, and deadline settings
//! - [`errors`]: Application error model with HTTP response mapping
//! - [`credentials`]: Request payload validation
//! - [`transport`]: Connection descriptors and TLS policy
//! - [`imap`]: `MailTransport` capability trait and its `async-imap` implementation
//! - [`session`]: Deadline-bounded session lifecycle
//! - [`mailbox`]: Read-only INBOX reader
//! - [`mime`]: Header parsing, body decoding, and preview building
//! - [`models`]: Message records and response bodies
//! - [`server`]: axum router and operation handlers

mod config;
mod credentials;
mod errors;
mod imap;
mod mailbox;
mod mime;
mod models;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod transport;

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use config::ServerConfig;
use imap::ImapTransport;
use server::AppState;
use tracing_subscriber::EnvFilter;

/// Command-line overrides for the listener
#[derive(Debug, Parser)]
#[command(version, about = "IMAP connection test and latest-message HTTP service")]
struct Cli {
    /// Listen address (overrides MAIL_LATEST_BIND)
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves HTTP until
/// Ctrl-C. In-flight requests finish (within their own deadlines) before
/// the process exits.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// PORT=3001 \
/// CORS_ORIGIN=https://app.example.com \
/// RUST_LOG=info \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load_from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let transport = ImapTransport::new()?;
    tracing::warn!(
        "IMAP server certificate chains are not validated; any certificate presented by the configured host is accepted"
    );

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let app = server::router(AppState::new(config, transport))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
