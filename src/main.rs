use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use video_pipeline::app;
use video_pipeline::config::settings::AppConfig;
use video_pipeline::workers::sweep::run_pending_sweep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("JWT_SECRET must be set")?;
    let port = config.server_port;
    let sweep_interval = config.transcode.sweep_interval;

    let (state, workers) = app::build_state(config).await?;

    let shutdown = CancellationToken::new();
    let sweep = tokio::spawn(run_pending_sweep(
        state.jobs.clone(),
        state.queue.clone(),
        sweep_interval,
        shutdown.clone(),
    ));

    let router = app::create_app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweep.await {
        tracing::error!("Pending sweep ended abnormally: {}", e);
    }
    workers.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
