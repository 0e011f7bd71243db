//! Webhook ingest server.
//!
//! Accepts webhook calls over HTTP and publishes the normalized events to
//! the broker queue, answering each call only once the broker confirmed it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hookrelay::{start_server, AppState, LapinConnector, Publisher, RelayConfig, SessionSupply};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "hook-server", about = "Webhook ingest server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    let cli = Cli::parse();

    let config = RelayConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        broker = %config.broker_uri_masked(),
        queue = %config.queue_name,
        port = config.port,
        "configuration loaded"
    );

    let token = CancellationToken::new();
    let connector = Arc::new(LapinConnector::new(
        config.broker_uri.clone(),
        config.connect_timeout(),
    ));

    let (supply, supply_task) = SessionSupply::spawn(
        token.clone(),
        connector,
        config.queue_name.clone(),
        config.backoff(),
    );

    let (publish_tx, publish_rx) = mpsc::channel(config.publish_buffer);
    let publisher_task =
        Publisher::new(supply, publish_rx, config.queue_name.clone(), token.clone()).spawn();

    let state = AppState::new(config.api_key.clone(), publish_tx);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let mut server_task = tokio::spawn(start_server(state, addr, token.clone()));

    tokio::select! {
        () = shutdown_signal() => {}
        joined = &mut server_task => {
            match joined {
                Ok(Ok(())) => info!("server exited"),
                Ok(Err(e)) => error!(error = %e, "server failed"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
        }
    }

    token.cancel();

    if !server_task.is_finished() {
        let _ = server_task.await;
    }
    let _ = publisher_task.await;
    let _ = supply_task.await;

    info!("hook-server shutdown complete");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hookrelay=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
