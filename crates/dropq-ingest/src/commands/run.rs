//! `dropq run`

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use super::build_sender;
use crate::config::AppConfig;
use crate::service::IngestService;
use crate::transform::TransformRegistry;

/// Run the service until Ctrl-C or SIGTERM
pub async fn run(config: AppConfig) -> Result<()> {
    let sender = build_sender(&config).await?;
    let service = IngestService::start(config, sender, Arc::new(TransformRegistry::with_builtins()))
        .await
        .context("Failed to start the ingestion service")?;

    shutdown_signal().await;
    service.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
