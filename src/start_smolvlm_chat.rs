//! Startup helpers for the chat server.
//!
//! Reads configuration from the environment, provisions directories, loads
//! the initial model through the inference sidecar and serves the page.

use std::process::ExitCode;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::{RemoteClient, RemoteFactory};
use crate::error::ChatResult;
use crate::server::{self, AppState};
use crate::service::ChatService;

/// Run the server (used by the `smolvlm-chat` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();

    tracing::info!("Starting SmolVLM2 chat v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::debug!(?config, "Effective configuration");

    if let Err(e) = config.ensure_directories() {
        tracing::error!("Failed to create directories: {e}");
        return ExitCode::from(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let state = match rt.block_on(initialize(config)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, shutdown_signal())) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("Server stopped");
    ExitCode::SUCCESS
}

/// Install the global subscriber; `RUST_LOG` refines the default `info` level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Connect to the inference sidecar, load the configured model and build the
/// application state without starting the server.
///
/// # Errors
/// Returns an error if the sidecar URL is invalid or the model cannot be loaded.
pub async fn initialize(config: AppConfig) -> ChatResult<Arc<AppState>> {
    tracing::info!("Inference endpoint: {}", config.inference_url);

    let client = RemoteClient::new(&config.inference_url)?;
    let factory = Arc::new(RemoteFactory::new(client.clone()));
    let service = ChatService::start(&config, factory, Arc::new(client)).await?;

    AppState::new(service, config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
