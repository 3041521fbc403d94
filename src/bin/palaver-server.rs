//! HTTP server for the palaver chat service.
//!
//! Configuration comes from the environment (`GEMINI_API_KEY`, `TRANSLATE_API_KEY` and
//! `BASE_URL` are required); logging is controlled by `RUST_LOG`.
//!
//! # Usage
//!
//! ```bash
//! palaver-server --listen 0.0.0.0:8000
//!
//! # Structured logs for collection
//! RUST_LOG=palaver=debug,tower_http=info palaver-server --json-logs
//! ```

use std::sync::Arc;

use arrrg::CommandLine;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use palaver::config::{AppConfig, ServerArgs};
use palaver::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ServerArgs::from_command_line_relaxed("palaver-server [OPTIONS]");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = AppConfig::from_env()?;
    info!(version = env!("CARGO_PKG_VERSION"), base_url = %config.base_url, "palaver-server starting");

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    let shutdown = CancellationToken::new();
    let maintenance = orchestrator.spawn_maintenance(config.sweep_interval, shutdown.clone());

    let listener = TcpListener::bind(args.listen_addr()).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    palaver::server::serve(listener, orchestrator, shutdown.clone()).await?;
    shutdown.cancel();
    if let Err(err) = maintenance.await {
        warn!(error = %err, "maintenance task failed");
    }
    info!("palaver-server stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
