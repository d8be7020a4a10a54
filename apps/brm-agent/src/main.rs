//! # BRM Agent
//!
//! Mirrors a backup/restore model snapshot into the configuration mediator.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load config ──► load model ──► initialize (wait for mediator, push)   │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                              lease renewal loop                         │
//! │                                        │                                │
//! │  SIGINT / SIGTERM ─────────────────────┴──► shutdown                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `brm-agent [CONFIG_PATH]`. Without a path the platform config
//! directory is used; `BRM_SYNC_*` variables override either.

use std::path::PathBuf;
use std::sync::Arc;

use brm_core::StaticModel;
use brm_sync::{HttpMediatorClient, SyncConfig, SyncOrchestrator};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting BRM agent...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;
    info!(
        mediator = %config.mediator.url,
        schema = %config.schema_name(),
        enabled = config.is_sync_enabled(),
        "Configuration loaded"
    );

    let model = match &config.agent.model_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let model = StaticModel::from_json(&raw)?;
            info!(?path, "Model snapshot loaded");
            model
        }
        None => {
            info!("No model snapshot configured, pushing an empty configuration");
            StaticModel::new(Vec::new())
        }
    };

    let client = Arc::new(HttpMediatorClient::new(&config.mediator)?);
    let orchestrator = SyncOrchestrator::new(config, client, Arc::new(model))?;

    let outcome = tokio::select! {
        result = orchestrator.initialize() => match result {
            Ok(()) => {
                orchestrator.start_lease_renewal();
                info!("Agent running");
                shutdown_signal().await;
                Ok(())
            }
            Err(e) => {
                error!(?e, "Startup failed");
                Err(e)
            }
        },

        _ = shutdown_signal() => {
            info!("Shutdown requested during startup");
            Ok(())
        }
    };

    orchestrator.shutdown().await;
    info!("Agent stopped");
    outcome.map_err(Into::into)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
