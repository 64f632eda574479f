//! rolewatch - primary/replica role monitor for PostgreSQL and Redis clusters

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use rolewatch_cluster::{build_jobs, open_store, Monitor, PrometheusSink};
use rolewatch_core::bootstrap::load_config;
use rolewatch_core::logging::init_logging;
use rolewatch_core::metrics::gather_metrics;

#[derive(Parser, Debug)]
#[command(name = "rolewatch")]
#[command(about = "Cluster role and failover monitor", long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, env = "ROLEWATCH_CONFIG_PATH")]
    config: Option<String>,

    /// Run every job once, print the metrics and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_logging(&config.logging)?;

    info!("Starting rolewatch v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config.state).context("Failed to open state store")?;
    let jobs = build_jobs(&config, store).context("Failed to build poll jobs")?;
    let monitor = Monitor::new(
        jobs,
        Arc::new(PrometheusSink),
        Duration::from_secs(config.poller.interval_seconds),
    );

    if args.once {
        let failures = monitor.run_once().await;
        print!("{}", gather_metrics()?);
        if failures > 0 {
            anyhow::bail!("{failures} poll job(s) failed");
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let exporter = config
        .exporter
        .enabled
        .then(|| server::spawn_exporter(config.exporter_address(), shutdown_rx));

    let poller = monitor.start();
    info!(interval_seconds = config.poller.interval_seconds, "Monitor started");

    server::shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    monitor.shutdown();
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller.await {
        error!("Monitor task failed: {}", e);
    }
    if let Some(exporter) = exporter {
        if let Err(e) = exporter.await {
            error!("Exporter task failed: {}", e);
        }
    }

    info!("rolewatch stopped");
    Ok(())
}
