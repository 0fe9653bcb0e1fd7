use anyhow::Context;

use mailflow_api::app::{build_app, services::build_services};
use mailflow_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (services, runtime) = build_services(&config)
        .await
        .context("failed to start services")?;

    let app = build_app(services);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
}
