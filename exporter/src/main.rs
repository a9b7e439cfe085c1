//! Intel GPU metrics exporter
//!
//! Runs the platform telemetry command, keeps Prometheus gauges in sync with
//! its readings and serves them over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use igpu_exporter::config::{Args, ExporterConfig, LogLevel};
use igpu_exporter::server::http;
use igpu_gatherer::Gatherer;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ExporterConfig::from_args(args)?;

    init_tracing(config.log_level)?;

    run(config).await
}

async fn run(config: ExporterConfig) -> Result<()> {
    let registry = Registry::new();
    let cancel = CancellationToken::new();

    let gatherer = Gatherer::new(config.gatherer.clone(), &registry)
        .context("Failed to set up gatherer")?;
    let state = gatherer.state();
    info!(
        "Gathering {} telemetry every {:?}",
        gatherer.config().platform,
        gatherer.config().refresh
    );

    let running = gatherer
        .start(cancel.clone())
        .context("Failed to start GPU telemetry command")?;

    tokio::spawn(shutdown_signal(cancel.clone()));

    info!("Starting GPU metrics exporter on port {}", config.listen_addr.port());
    let served = http::serve_admin(config.listen_addr, registry, state, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = running.wait().await {
        error!("Gatherer task failed: {}", e);
    }

    served.with_context(|| format!("HTTP server on {} failed", config.listen_addr))
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
    cancel.cancel();
}

fn init_tracing(level: LogLevel) -> Result<()> {
    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}
