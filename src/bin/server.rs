//! GTNet Server - headless federation node
//!
//! Runs the background tasks of a node: the import job worker, the periodic
//! exchange sync, the outbound message dispatcher and the metrics reporter.
//! Metrics are pushed via structured JSON logs to stdout.
//!
//! # Usage
//! ```sh
//! GTNET_MY_ENTRY_ID=1 cargo run --bin gtnet-server
//! ```
//!
//! # Environment Variables
//! - `DATABASE_URL` - SQLite store (default: sqlite://data/gtnet.db)
//! - `GTNET_SYNC_MODE` - INCREMENTAL or FULL_RECREATION (default: INCREMENTAL)
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_REPORT_INTERVAL` - Seconds between metric outputs (default: 60)

use anyhow::Result;
use gtnet::application::bootstrap::{PersistenceBootstrap, ServicesBootstrap};
use gtnet::config::Config;
use gtnet::infrastructure::LoggingTransport;
use gtnet::infrastructure::observability::{Metrics, MetricsReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("GTNet Server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Store={}, SyncMode={}, MyEntry={:?}",
        config.database.url, config.scheduler.sync_mode, config.gtnet.my_entry_id
    );

    let metrics = Metrics::new()?;
    let persistence = PersistenceBootstrap::init(&config.database).await?;
    let services = ServicesBootstrap::init(&config.gtnet, persistence, metrics.clone());

    match services.registry.local_peer().await {
        Ok(peer) => info!("Local peer: {} ({})", peer.domain_name, peer.id),
        Err(e) => warn!("No local peer yet, exchange sync will fail until one is registered: {:#}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let worker = services.import_worker();
    let poll = Duration::from_secs(config.scheduler.import_poll_seconds);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { worker.run(poll, rx).await }));

    let sync = services.exchange_sync.clone();
    let mode = config.scheduler.sync_mode;
    let every = Duration::from_secs(config.scheduler.sync_interval_minutes * 60);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { sync.run_periodically(mode, every, rx).await }));

    let dispatcher = services.dispatcher(Arc::new(LoggingTransport), config.scheduler.dispatch_batch_size);
    let every = Duration::from_secs(config.scheduler.dispatch_interval_seconds);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { dispatcher.run(every, rx).await }));

    if config.observability.enabled {
        let interval = config.observability.report_interval_seconds;
        let reporter = MetricsReporter::new(
            services.persistence.peer_repository.clone(),
            metrics,
            interval,
        );

        tokio::spawn(async move {
            reporter.run().await;
        });

        info!("Metrics reporter started (interval: {}s)", interval);
    } else {
        info!("Metrics reporting disabled.");
    }

    info!("Server running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping background tasks...");

    shutdown_tx.send(true)?;
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Bye.");
    Ok(())
}
