use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::{connect_to_db, run_migrations};
use crate::infrastructure::media::{FfmpegTranscoder, FfprobeProbe};
use crate::infrastructure::storage::create_storage;
use crate::modules::intake::validator::IntakeValidator;
use crate::modules::jobs::{InMemoryJobStore, JobStore, PgJobStore};
use crate::state::AppState;
use crate::workers::{self, TranscodeOrchestrator, TranscodeWorkers};

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes(state.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects every collaborator and starts the transcode workers.
pub async fn build_state(config: AppConfig) -> anyhow::Result<(AppState, TranscodeWorkers)> {
    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialise storage")?;

    let jobs: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            let pool = connect_to_db(url).await.context("Failed to connect to database")?;
            run_migrations(&pool).await.context("Failed to run migrations")?;
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            warn!("⚠️ DATABASE_URL not set, jobs are kept in memory and lost on restart");
            Arc::new(InMemoryJobStore::new())
        }
    };

    tokio::fs::create_dir_all(&config.transcode.work_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.transcode.work_dir.display()))?;

    let probe = Arc::new(FfprobeProbe::new(
        config.intake.ffprobe_path.clone(),
        config.intake.probe_timeout,
    ));
    let validator = IntakeValidator::new(config.intake.policy(), probe);

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.transcode.ffmpeg_path.clone(),
        config.transcode.segment_seconds,
        config.transcode.preset.clone(),
    ));
    let orchestrator = Arc::new(TranscodeOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        transcoder,
        config.transcode.work_dir.clone(),
    ));
    let (queue, workers) = workers::queue::start(
        orchestrator,
        config.transcode.workers,
        config.transcode.queue_capacity,
    );

    Ok((AppState::new(config, jobs, storage, validator, queue), workers))
}
