//! Colforge Worker
//!
//! Daemon that executes collagen computation jobs against the
//! colbuilder tool.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Store: job records and the status state machine
//! - Queue: lanes, worker sets, retry policy, cancellation
//! - Executor: config materialization and subprocess runs
//! - Scheduler: periodic expiry sweep over old jobs

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use colforge_worker::config::Config;
use colforge_worker::executor::JobExecutor;
use colforge_worker::queue::TaskQueue;
use colforge_worker::scheduler::ExpirySweeper;
use colforge_worker::store::JobStore;
use colforge_worker::store::memory::MemoryJobStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colforge_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Colforge Worker");

    let config = load_config()?;
    info!(
        "Loaded configuration: colbuilder={}, workdir_base={}",
        config.colbuilder_path.display(),
        config.workdir_base.display()
    );

    tokio::fs::create_dir_all(&config.workdir_base)
        .await
        .context("Failed to create workdir base")?;

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(JobExecutor::new(&config));

    let queue = TaskQueue::start(&config, store.clone(), executor);
    info!(
        "Queue started: {} default / {} molecular workers",
        config.default_lane_workers, config.molecular_lane_workers
    );

    // Jobs left active by a previous run are delivered again
    let recovered = queue
        .recover()
        .await
        .context("Failed to recover active jobs")?;
    if recovered > 0 {
        info!("Recovered {} active job(s)", recovered);
    }

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(
        store.clone(),
        config.workdir_base.clone(),
        config.retention,
        config.sweep_interval,
    );
    tokio::spawn(sweeper.run(shutdown.clone()));
    info!("Expiry sweeper scheduled every {:?}", config.sweep_interval);

    info!("Worker initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping");

    shutdown.cancel();
    queue.shutdown();

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
