use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod routes;
mod state;
mod workers;

use config::settings::AppConfig;
use infrastructure::db::pool::connect_to_db;
use infrastructure::redis::client::RedisService;
use infrastructure::storage::s3::StorageService;
use state::AppState;
use workers::encoder::EncoderSettings;
use workers::progress::ProgressStore;
use workers::queue::JobQueue;
use workers::transcoder::Transcoder;

const PROGRESS_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting server...");

    let config = AppConfig::new()?;

    let encoder = EncoderSettings::from_config(&config.ffmpeg);
    encoder.ensure_available().await?;

    let progress = ProgressStore::new(Duration::from_secs(config.ffmpeg.progress_ttl_secs));
    progress.spawn_janitor(PROGRESS_SWEEP_INTERVAL);

    let jobs = JobQueue::new(
        config.ffmpeg.max_jobs,
        config.ffmpeg.workers,
        Transcoder::new(Arc::new(encoder), progress),
    );
    jobs.start_worker_pool();

    let db = connect_to_db(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    let redis = RedisService::new(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    let storage = StorageService::new(&config.storage);

    let port = config.server_port;
    let state = AppState::new(config, db, redis, storage, jobs.clone());
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.close();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
