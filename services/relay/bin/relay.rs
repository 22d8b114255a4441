//! Main Entrypoint for the Jarvis Relay
//!
//! 1. Loads configuration from the environment.
//! 2. Initializes logging.
//! 3. Builds the shared state (action executor, session configuration).
//! 4. Serves the relay router until Ctrl+C.

use anyhow::Context;
use jarvis_core::actions::SystemLauncher;
use jarvis_relay::{config::Config, router::create_router, state::AppState};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Shared State ---
    let launcher = Arc::new(SystemLauncher::new(config.open_command.clone()));
    let bind_address = config.bind_address;
    let relay_path = config.relay_path.clone();
    let app_state = Arc::new(AppState::new(config, launcher));

    // --- 4. Start Server ---
    let app = create_router(app_state);
    info!(
        %bind_address,
        %relay_path,
        "Service configured. Starting relay..."
    );
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
