use anyhow::Result;
use tokio::signal;

use offline_sync::app::OfflineSync;
use offline_sync::config::Settings;
use offline_sync::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    telemetry::init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    let service = OfflineSync::from_settings(settings)?;
    service.start().await;

    shutdown_signal_handler().await;

    tracing::info!("Stopping connectivity watcher...");
    match service.shutdown().await {
        Ok(Some(report)) => tracing::info!(
            replayed = report.replayed,
            requeued = report.requeued,
            "Final replay finished"
        ),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "Final replay failed"),
    }

    tracing::info!(pending_bytes = service.queue.size().await, "Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
