use std::sync::Arc;

use anyhow::Context;

use clientdesk_api::app::{
    self,
    services::{AppServices, Backends},
};
use clientdesk_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clientdesk_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let backends = Backends::from_config(&config)
        .await
        .context("failed to connect backends")?;
    let services = Arc::new(AppServices::new(&config, backends));

    let worker = if config.worker.enabled {
        Some(services.log_worker(&config.worker).spawn())
    } else {
        tracing::info!("embedded log worker disabled");
        None
    };

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app::build_app(services.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    if let Err(e) = services.queue().close().await {
        tracing::warn!(error = %e, "failed to close job queue");
    }

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
