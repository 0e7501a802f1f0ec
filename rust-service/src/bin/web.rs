//! SmsVault Web Server - SMS webhook receiver and query API.
//!
//! This binary:
//! - Receives signed SMS webhooks and verifies their HMAC signatures
//! - Records each message exactly once in SQLite
//! - Serves message search, aggregate statistics, and health probes
//!
//! Startup fails fast when the store location or webhook secret is missing.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smsvault::web::app_router;
use smsvault::{AppState, Config, SqliteMessageStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; missing DATABASE_URL or WEBHOOK_SECRET aborts here
    let config = Config::from_env().context("Invalid configuration")?;

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");
    info!(
        port = config.port,
        database_path = config.database_path(),
        log_level = %config.log_level,
        "config_loaded"
    );

    // Open the message store, creating the schema if needed
    let store = SqliteMessageStore::new(config.database_path())
        .context("Failed to open message store")?;
    info!("message_store_ready");

    // Create application state
    let port = config.port;
    let state = AppState::new(config, store);

    // Build the router
    let app = app_router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
