//! flashdrop daemon: runs the issuance worker, outbox relay, and
//! dead-letter pipeline until SIGINT/SIGTERM.

#![forbid(unsafe_code)]

use flashdrop_runtime::metrics::MetricsServer;
use flashdrop_service::{Config, ResourceManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("Starting flashdrop service");

    let resources = ResourceManager::from_config(config.clone()).await?;

    let mut metrics_server = MetricsServer::new(
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()?,
    );
    metrics_server.start()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = resources.spawn_pipeline(&shutdown_tx);

    info!("flashdrop service running");
    shutdown_signal().await;
    info!("Shutdown signal received, stopping background tasks");

    let _ = shutdown_tx.send(());
    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    for (name, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task = name, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
            Err(_) => warn!(task = name, "Task shutdown timed out"),
        }
    }

    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
#[allow(clippy::expect_used)] // Signal handler installation failure is unrecoverable
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
