//! Queue worker.
//!
//! Consumes the broker queue and forwards each payload to the sinks of the
//! configured environment, acknowledging only what the sinks have taken.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hookrelay::{dispatch, sinks_for, Consumer, LapinConnector, RelayConfig, SessionSupply};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "hook-worker", about = "Queue worker forwarding events to sinks")]
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
        environment = ?config.environment,
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

    let (sink_tx, sink_rx) = mpsc::channel(config.sink_buffer);
    let consumer_task =
        Consumer::new(supply, sink_tx, config.queue_name.clone(), token.clone()).spawn();
    let mut dispatch_task = tokio::spawn(dispatch(
        sink_rx,
        sinks_for(config.environment),
        token.clone(),
    ));

    tokio::select! {
        () = shutdown_signal() => {}
        joined = &mut dispatch_task => {
            if let Err(e) = joined {
                error!(error = %e, "sink dispatch panicked");
            }
        }
    }

    token.cancel();

    let _ = consumer_task.await;
    if !dispatch_task.is_finished() {
        let _ = dispatch_task.await;
    }
    let _ = supply_task.await;

    info!("hook-worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // stdout carries payloads in development and production
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hookrelay=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
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
