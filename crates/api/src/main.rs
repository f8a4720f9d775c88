use std::sync::Arc;

use anyhow::Context;

use counsel_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    counsel_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(counsel_api::app::services::build_services(&config).await?);
    let app = counsel_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let in_flight = services.spawner.in_flight();
    if in_flight > 0 {
        tracing::info!(in_flight, "waiting for background generations");
    }
    services.spawner.wait_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
