use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{Job, JobStatus, NewJob};
use super::repository::{JobError, JobStore};

/// Process-local job store for development runs without PostgreSQL, and for
/// tests. One lock guards the whole map, so every transition is atomic.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn transition<F>(&self, id: Uuid, to: JobStatus, allowed: F, apply: impl FnOnce(&mut Job)) -> Result<Job, JobError>
    where
        F: FnOnce(&Job) -> bool,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;

        if !allowed(job) {
            return Err(JobError::InvalidTransition { from: job.status, to });
        }

        job.status = to;
        job.updated_at = OffsetDateTime::now_utc();
        apply(job);
        Ok(job.clone())
    }

    /// `processing -> to`, only for the run that holds the claim.
    async fn finish_run(&self, id: Uuid, run_id: Uuid, to: JobStatus, apply: impl FnOnce(&mut Job)) -> Result<Job, JobError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;

        if job.run_id != Some(run_id) {
            return Err(JobError::Superseded { id, run_id });
        }
        if job.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition { from: job.status, to });
        }

        job.status = to;
        job.updated_at = OffsetDateTime::now_utc();
        apply(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, JobError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&new.id) || jobs.values().any(|j| j.source_key == new.source_key) {
            return Err(JobError::Duplicate(new.id));
        }

        let now = OffsetDateTime::now_utc();
        let job = Job {
            id: new.id,
            owner_id: new.owner_id,
            title: new.title,
            source_key: new.source_key,
            category: new.category,
            status: new.status,
            playlist_key: None,
            thumbnail_key: None,
            failure_reason: None,
            approved: new.approved,
            run_id: None,
            processing_started_at: None,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn list_pending(&self, updated_before: OffsetDateTime, limit: i64) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.updated_at <= updated_before)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn claim(&self, id: Uuid, run_id: Uuid) -> Result<Job, JobError> {
        self.transition(
            id,
            JobStatus::Processing,
            |job| job.status.can_transition_to(JobStatus::Processing),
            |job| {
                job.run_id = Some(run_id);
                job.processing_started_at = Some(OffsetDateTime::now_utc());
            },
        )
        .await
    }

    async fn mark_ready(&self, id: Uuid, run_id: Uuid, playlist_key: &str, thumbnail_key: &str) -> Result<Job, JobError> {
        self.finish_run(id, run_id, JobStatus::Ready, |job| {
            job.playlist_key = Some(playlist_key.to_string());
            job.thumbnail_key = Some(thumbnail_key.to_string());
            job.failure_reason = None;
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, run_id: Uuid, reason: &str) -> Result<Job, JobError> {
        self.finish_run(id, run_id, JobStatus::Failed, |job| {
            job.failure_reason = Some(reason.to_string());
            job.playlist_key = None;
            job.thumbnail_key = None;
        })
        .await
    }

    async fn reject_upload(&self, id: Uuid, reason: &str) -> Result<Job, JobError> {
        self.transition(
            id,
            JobStatus::Failed,
            |job| job.status == JobStatus::Uploading,
            |job| job.failure_reason = Some(reason.to_string()),
        )
        .await
    }

    async fn reset_for_reprocess(&self, id: Uuid, stale_before: OffsetDateTime) -> Result<Job, JobError> {
        self.transition(
            id,
            JobStatus::Pending,
            |job| match job.status {
                JobStatus::Failed => true,
                JobStatus::Processing => job.processing_started_at.is_some_and(|t| t <= stale_before),
                _ => false,
            },
            |job| {
                job.playlist_key = None;
                job.thumbnail_key = None;
                job.failure_reason = None;
                job.run_id = None;
                job.processing_started_at = None;
            },
        )
        .await
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Job, JobError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        job.approved = approved;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(job.clone())
    }
}
