use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::media::manifest::{
    ManifestError, MediaPlaylist, PLAYLIST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE,
    THUMBNAIL_CONTENT_TYPE, THUMBNAIL_FILE, is_valid_segment_name,
};
use crate::infrastructure::media::{TranscodeError, Transcoder};
use crate::infrastructure::storage::{Storage, StorageError, stage_source};
use crate::modules::jobs::layout;
use crate::modules::jobs::model::Job;
use crate::modules::jobs::repository::{JobError, JobStore};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("transcode: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("manifest references missing or invalid segment '{0}'")]
    MissingSegment(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub enum ProcessOutcome {
    /// Another run owns the job, or it is no longer waiting.
    Skipped,
    /// The job was reset and reclaimed while this run was still going.
    Superseded,
    Ready(Job),
    Failed(String),
}

/// One claimed run of a job. Only the holder may publish for the job or
/// finish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunClaim {
    pub job_id: Uuid,
    pub run_id: Uuid,
}

struct Published {
    playlist_key: String,
    thumbnail_key: String,
}

/// Runs one job from source blob to published HLS rendition.
pub struct TranscodeOrchestrator {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    transcoder: Arc<dyn Transcoder>,
    work_root: PathBuf,
}

impl TranscodeOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        transcoder: Arc<dyn Transcoder>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            storage,
            transcoder,
            work_root: work_root.into(),
        }
    }

    /// Moves the job to `processing` under a fresh run id. `None` when the
    /// job is not waiting to be processed.
    pub async fn claim(&self, job_id: Uuid) -> Option<RunClaim> {
        let run_id = Uuid::new_v4();
        match self.jobs.claim(job_id, run_id).await {
            Ok(_) => Some(RunClaim { job_id, run_id }),
            Err(JobError::InvalidTransition { from, .. }) => {
                warn!(job_id = %job_id, "Skipping run, job is {}", from);
                None
            }
            Err(e) => {
                error!(job_id = %job_id, "Could not claim job: {}", e);
                None
            }
        }
    }

    pub async fn process(&self, job_id: Uuid, source_key: &str) -> ProcessOutcome {
        match self.claim(job_id).await {
            Some(claim) => self.execute(claim, source_key).await,
            None => ProcessOutcome::Skipped,
        }
    }

    pub async fn execute(&self, claim: RunClaim, source_key: &str) -> ProcessOutcome {
        info!(
            job_id = %claim.job_id,
            run_id = %claim.run_id,
            source_key = %source_key,
            "🎥 Transcoding started"
        );
        let started = Instant::now();
        let work_dir = layout::work_dir(&self.work_root, claim.job_id, claim.run_id);

        let result = self.run(claim, source_key, &work_dir).await;
        self.remove_work_dir(claim).await;

        let published = match result {
            Ok(published) => published,
            Err(e) => return self.fail(claim, &e.to_string()).await,
        };

        match self
            .jobs
            .mark_ready(claim.job_id, claim.run_id, &published.playlist_key, &published.thumbnail_key)
            .await
        {
            Ok(job) => {
                info!(
                    job_id = %claim.job_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "✅ Job ready"
                );
                ProcessOutcome::Ready(job)
            }
            Err(JobError::Superseded { .. }) => {
                warn!(job_id = %claim.job_id, run_id = %claim.run_id, "Run superseded, discarding its outputs");
                self.discard_outputs(claim).await;
                ProcessOutcome::Superseded
            }
            Err(e) => self.fail(claim, &format!("could not record outputs: {}", e)).await,
        }
    }

    /// Records a failed run. The job is marked failed before the run's
    /// outputs go, so a job never points at deleted blobs. A run that lost
    /// its claim only cleans up after itself.
    pub async fn fail(&self, claim: RunClaim, reason: &str) -> ProcessOutcome {
        self.remove_work_dir(claim).await;

        match self.jobs.mark_failed(claim.job_id, claim.run_id, reason).await {
            Ok(_) => {
                error!(job_id = %claim.job_id, "❌ Transcoding failed: {}", reason);
                self.discard_outputs(claim).await;
                ProcessOutcome::Failed(reason.to_string())
            }
            Err(JobError::Superseded { .. }) => {
                warn!(
                    job_id = %claim.job_id,
                    run_id = %claim.run_id,
                    "Superseded run failed: {}", reason
                );
                self.discard_outputs(claim).await;
                ProcessOutcome::Superseded
            }
            // Outputs stay: the job may still reference them.
            Err(e) => {
                error!(job_id = %claim.job_id, "Could not record failure ({}): {}", reason, e);
                ProcessOutcome::Failed(reason.to_string())
            }
        }
    }

    async fn discard_outputs(&self, claim: RunClaim) {
        let prefix = layout::run_prefix(claim.job_id, claim.run_id);
        if let Err(e) = self.storage.delete_prefix(&prefix).await {
            warn!(job_id = %claim.job_id, "Failed to remove outputs under {}: {}", prefix, e);
        }
    }

    async fn remove_work_dir(&self, claim: RunClaim) {
        remove_dir_all(&layout::work_dir(&self.work_root, claim.job_id, claim.run_id)).await;
        // Only succeeds once no other run of the job has scratch space left.
        let _ = tokio::fs::remove_dir(layout::job_work_root(&self.work_root, claim.job_id)).await;
    }

    async fn run(&self, claim: RunClaim, source_key: &str, work_dir: &Path) -> Result<Published, PipelineError> {
        let job_id = claim.job_id;
        tokio::fs::create_dir_all(work_dir).await?;

        // Dropping the guard removes a downloaded copy on every exit path.
        let source = stage_source(self.storage.as_ref(), source_key).await?;
        if source.is_temporary() {
            info!(job_id = %job_id, "⬇️ Staged remote source at {}", source.path().display());
        }

        let manifest_path = self.transcoder.segment(source.path(), work_dir).await?;
        let thumbnail_path = work_dir.join(THUMBNAIL_FILE);
        self.transcoder.thumbnail(source.path(), &thumbnail_path).await?;

        let playlist = MediaPlaylist::parse(&tokio::fs::read_to_string(&manifest_path).await?)?;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for entry in &playlist.segments {
            if !is_valid_segment_name(&entry.uri) {
                return Err(PipelineError::MissingSegment(entry.uri.clone()));
            }
            let path = work_dir.join(&entry.uri);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(PipelineError::MissingSegment(entry.uri.clone()));
            }
            segments.push((entry.uri.as_str(), path));
        }
        if !tokio::fs::try_exists(&thumbnail_path).await.unwrap_or(false) {
            return Err(TranscodeError::MissingOutput(THUMBNAIL_FILE.to_string()).into());
        }

        for (name, path) in &segments {
            self.storage
                .put_file(&layout::run_key(job_id, claim.run_id, name), path, SEGMENT_CONTENT_TYPE)
                .await?;
        }
        let thumbnail_key = layout::thumbnail_key(job_id, claim.run_id);
        self.storage
            .put_file(&thumbnail_key, &thumbnail_path, THUMBNAIL_CONTENT_TYPE)
            .await?;

        // The playlist goes last: once it exists, everything it names does
        // too. Only the checked entries are published.
        let playlist_key = layout::playlist_key(job_id, claim.run_id);
        self.storage
            .put(&playlist_key, Bytes::from(playlist.render()), PLAYLIST_CONTENT_TYPE)
            .await?;

        info!(
            job_id = %job_id,
            segments = segments.len(),
            duration_secs = playlist.total_duration(),
            "📦 Published HLS rendition"
        );

        Ok(Published {
            playlist_key,
            thumbnail_key,
        })
    }
}

async fn remove_dir_all(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove work dir {}: {}", dir.display(), e),
    }
}
