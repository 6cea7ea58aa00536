use std::io::ErrorKind;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::layout;
use super::model::{Job, JobStatus};
use super::repository::JobError;
use crate::infrastructure::storage::StorageError;
use crate::state::AppState;
use crate::workers::{QueueError, TranscodeTask};

#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} is already processing")]
    AlreadyProcessing(Uuid),

    #[error("Job {id} is {status}; only failed jobs can be reprocessed")]
    NotReprocessable { id: Uuid, status: JobStatus },

    #[error("Failed to clear previous output: {0}")]
    Cleanup(#[from] StorageError),

    #[error(transparent)]
    Job(JobError),
}

impl From<JobError> for ReprocessError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound(id) => ReprocessError::NotFound(id),
            other => ReprocessError::Job(other),
        }
    }
}

pub struct JobService;

impl JobService {
    pub async fn find(state: &AppState, id: Uuid) -> Result<Job, JobError> {
        state.jobs.find(id).await?.ok_or(JobError::NotFound(id))
    }

    /// Administrator-triggered retry of a failed job, or of a run that has
    /// been `processing` for longer than the stale threshold.
    ///
    /// The reset is one atomic store operation, so of two concurrent calls
    /// exactly one is accepted. Previous outputs are cleared before the job
    /// is queued again.
    pub async fn reprocess(state: &AppState, id: Uuid) -> Result<Job, ReprocessError> {
        let stale_before = OffsetDateTime::now_utc() - state.config.transcode.stale_after;

        let job = match state.jobs.reset_for_reprocess(id, stale_before).await {
            Ok(job) => job,
            Err(JobError::InvalidTransition { from: JobStatus::Processing, .. }) => {
                return Err(ReprocessError::AlreadyProcessing(id));
            }
            Err(JobError::InvalidTransition { from, .. }) => {
                return Err(ReprocessError::NotReprocessable { id, status: from });
            }
            Err(e) => return Err(e.into()),
        };

        // Every run's outputs go, including those of a superseded stale run.
        let removed = state.storage.delete_prefix(&layout::output_prefix(id)).await?;
        let work_dir = layout::job_work_root(&state.config.transcode.work_dir, id);
        match tokio::fs::remove_dir_all(&work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %id, "Failed to remove work dir {}: {}", work_dir.display(), e),
        }
        info!(job_id = %id, removed, "🔁 Job reset for reprocessing");

        let task = TranscodeTask {
            job_id: id,
            source_key: job.source_key.clone(),
        };
        match state.queue.try_submit(task) {
            Ok(()) => {}
            Err(QueueError::Full(_)) | Err(QueueError::AlreadyQueued(_)) => {}
            Err(QueueError::Closed) => warn!(job_id = %id, "Queue closed, job left pending"),
        }

        Ok(job)
    }

    /// Moderation hook: approved content is viewable by everyone.
    pub async fn set_approved(state: &AppState, id: Uuid, approved: bool) -> Result<Job, JobError> {
        let job = state.jobs.set_approved(id, approved).await?;
        info!(job_id = %id, approved, "Moderation flag updated");
        Ok(job)
    }
}
