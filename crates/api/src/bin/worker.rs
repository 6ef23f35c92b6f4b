//! Standalone log worker: drains the log queue into the log store.

use std::sync::Arc;

use anyhow::Context;

use clientdesk_api::app::services::{AppServices, Backends};
use clientdesk_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clientdesk_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let backends = Backends::from_config(&config)
        .await
        .context("failed to connect backends")?;
    let services = Arc::new(AppServices::new(&config, backends));

    let handle = services.log_worker(&config.worker).spawn();
    tracing::info!(
        queue = %services.producer().queue_name(),
        concurrency = config.worker.concurrency,
        "log worker started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");

    let stats = handle.stats();
    handle.shutdown().await;
    tracing::info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        retried = stats.jobs_retried,
        failed = stats.jobs_failed,
        "log worker stopped"
    );

    services
        .queue()
        .close()
        .await
        .context("failed to close job queue")?;
    Ok(())
}
