//! Tack Market Worker
//!
//! Runs the marketplace background runtime: the scheduled-job worker pool and the periodic
//! sweeps. Configuration comes from `config/` and `TACK_MARKET__*` environment variables.

use anyhow::Context;
use tokio::signal;
use tracing::info;

use tack_market::config::ConfigManager;
use tack_market::logging::init_structured_logging;
use tack_market::MarketplaceRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config_manager = ConfigManager::load().context("failed to load configuration")?;
    info!(
        environment = %config_manager.environment(),
        config_dir = %config_manager.config_directory().display(),
        "Starting tack market worker"
    );

    let runtime = MarketplaceRuntime::start(config_manager)
        .await
        .context("failed to start marketplace runtime")?;

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let status = runtime.status();
    info!(
        jobs_succeeded = status.jobs_succeeded,
        jobs_failed = status.jobs_failed,
        pending_jobs = status.pending_jobs,
        "Stopping tack market worker"
    );
    runtime.shutdown().await;
    Ok(())
}
