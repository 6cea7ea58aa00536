use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Job, JobRow, JobStatus, NewJob};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job cannot move from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Run {run_id} no longer owns job {id}")]
    Superseded { id: Uuid, run_id: Uuid },

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for the Job Record.
///
/// Every status change is a single check-and-set: the store only applies it
/// when the current status is one of the transition's sources, otherwise it
/// reports `InvalidTransition` with the status it found.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<Job, JobError>;

    async fn find(&self, id: Uuid) -> Result<Option<Job>, JobError>;

    /// Pending jobs untouched since `updated_before`, oldest first.
    async fn list_pending(&self, updated_before: OffsetDateTime, limit: i64) -> Result<Vec<Job>, JobError>;

    /// `pending | uploading -> processing`, stamping `run_id` and
    /// `processing_started_at`.
    async fn claim(&self, id: Uuid, run_id: Uuid) -> Result<Job, JobError>;

    /// `processing -> ready` with both derived keys. Only the run that
    /// claimed the job may finish it; any other run gets `Superseded`.
    async fn mark_ready(&self, id: Uuid, run_id: Uuid, playlist_key: &str, thumbnail_key: &str) -> Result<Job, JobError>;

    /// `processing -> failed`, with the same ownership rule as `mark_ready`.
    async fn mark_failed(&self, id: Uuid, run_id: Uuid, reason: &str) -> Result<Job, JobError>;

    /// `uploading -> failed` for a direct upload that never arrived intact.
    async fn reject_upload(&self, id: Uuid, reason: &str) -> Result<Job, JobError>;

    /// `failed -> pending`, or `processing -> pending` when the run started at
    /// or before `stale_before`. Clears derived keys and the failure reason.
    async fn reset_for_reprocess(&self, id: Uuid, stale_before: OffsetDateTime) -> Result<Job, JobError>;

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Job, JobError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn statuses(sources: &[JobStatus]) -> Vec<String> {
        sources.iter().map(|s| s.as_str().to_string()).collect()
    }

    fn into_job(row: JobRow) -> Result<Job, JobError> {
        Job::try_from(row).map_err(JobError::Corrupt)
    }

    /// Explains why a conditional update matched nothing.
    async fn rejected(&self, id: Uuid, to: JobStatus) -> JobError {
        match self.find(id).await {
            Ok(Some(job)) => JobError::InvalidTransition { from: job.status, to },
            Ok(None) => JobError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn finish(&self, id: Uuid, to: JobStatus, row: Option<JobRow>) -> Result<Job, JobError> {
        match row {
            Some(row) => Self::into_job(row),
            None => Err(self.rejected(id, to).await),
        }
    }

    /// Like `finish`, but a job claimed by another run (or reset since) is
    /// reported as `Superseded`.
    async fn finish_run(&self, id: Uuid, run_id: Uuid, to: JobStatus, row: Option<JobRow>) -> Result<Job, JobError> {
        match row {
            Some(row) => Self::into_job(row),
            None => match self.find(id).await {
                Ok(Some(job)) if job.run_id != Some(run_id) => Err(JobError::Superseded { id, run_id }),
                Ok(Some(job)) => Err(JobError::InvalidTransition { from: job.status, to }),
                Ok(None) => Err(JobError::NotFound(id)),
                Err(e) => Err(e),
            },
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO video_jobs (id, owner_id, title, source_key, category, status, approved)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(&job.title)
        .bind(&job.source_key)
        .bind(job.category.as_str())
        .bind(job.status.as_str())
        .bind(job.approved)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => JobError::Duplicate(job.id),
            other => JobError::Database(other),
        })?;

        Self::into_job(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM video_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::into_job).transpose()
    }

    async fn list_pending(&self, updated_before: OffsetDateTime, limit: i64) -> Result<Vec<Job>, JobError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM video_jobs
            WHERE status = 'pending' AND updated_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(updated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::into_job).collect()
    }

    async fn claim(&self, id: Uuid, run_id: Uuid) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE video_jobs
            SET status = 'processing', run_id = $3, processing_started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2::text[])
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Self::statuses(&JobStatus::sources_for(JobStatus::Processing)))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        self.finish(id, JobStatus::Processing, row).await
    }

    async fn mark_ready(&self, id: Uuid, run_id: Uuid, playlist_key: &str, thumbnail_key: &str) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE video_jobs
            SET status = 'ready', playlist_key = $3, thumbnail_key = $4,
                failure_reason = NULL, updated_at = NOW()
            WHERE id = $1 AND run_id = $2 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(run_id)
        .bind(playlist_key)
        .bind(thumbnail_key)
        .fetch_optional(&self.pool)
        .await?;

        self.finish_run(id, run_id, JobStatus::Ready, row).await
    }

    async fn mark_failed(&self, id: Uuid, run_id: Uuid, reason: &str) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE video_jobs
            SET status = 'failed', failure_reason = $3,
                playlist_key = NULL, thumbnail_key = NULL, updated_at = NOW()
            WHERE id = $1 AND run_id = $2 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(run_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        self.finish_run(id, run_id, JobStatus::Failed, row).await
    }

    async fn reject_upload(&self, id: Uuid, reason: &str) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE video_jobs
            SET status = 'failed', failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'uploading'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        self.finish(id, JobStatus::Failed, row).await
    }

    async fn reset_for_reprocess(&self, id: Uuid, stale_before: OffsetDateTime) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE video_jobs
            SET status = 'pending', playlist_key = NULL, thumbnail_key = NULL,
                failure_reason = NULL, run_id = NULL, processing_started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND (status = 'failed'
                   OR (status = 'processing' AND processing_started_at <= $2))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        self.finish(id, JobStatus::Pending, row).await
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Job, JobError> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE video_jobs SET approved = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(approved)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::into_job).transpose()?.ok_or(JobError::NotFound(id))
    }
}
