use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{DirectUploadRequest, DirectUploadResponse};
use super::validator::ValidationError;
use crate::common::upload::SpooledUpload;
use crate::infrastructure::storage::{StorageError, stage_source};
use crate::middleware::auth::Requester;
use crate::modules::jobs::model::{Job, JobStatus, NewJob};
use crate::modules::jobs::repository::JobError;
use crate::state::AppState;
use crate::workers::{QueueError, TranscodeTask};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Missing form field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid upload: {0}")]
    BadRequest(String),

    #[error("Forbidden: upload belongs to another user")]
    Forbidden,

    #[error("Job {0} is not waiting for an upload")]
    NotUploading(Uuid),

    #[error("No uploaded object found for job {0}")]
    SourceMissing(Uuid),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keeps ASCII alphanumerics, `.`, `_`, `-` and non-ASCII letters; anything
/// else becomes `_`. Directory components are dropped.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') || (!c.is_ascii() && c.is_alphabetic()) {
                c
            } else {
                '_'
            }
        })
        .take(120)
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn source_key(owner_id: Uuid, job_id: Uuid, filename: &str) -> String {
    format!("videos/{}/{}_{}", owner_id, job_id, sanitize_filename(filename))
}

/// The signed upload is bound to this type, so it has to be a video.
fn video_content_type(declared: &str) -> Result<String, IntakeError> {
    let parsed: mime::Mime = declared
        .parse()
        .map_err(|_| IntakeError::BadRequest(format!("invalid content type '{}'", declared)))?;
    if parsed.type_() != mime::VIDEO {
        return Err(IntakeError::BadRequest(format!("'{}' is not a video content type", declared)));
    }
    Ok(parsed.essence_str().to_string())
}

fn enqueue(state: &AppState, job: &Job) -> Result<(), QueueError> {
    match state.queue.try_submit(TranscodeTask {
        job_id: job.id,
        source_key: job.source_key.clone(),
    }) {
        Err(QueueError::AlreadyQueued(_)) => Ok(()),
        other => other,
    }
}

pub struct IntakeService;

impl IntakeService {
    /// Upload received by this service: validate, store, record, queue.
    pub async fn submit_upload(
        state: &AppState,
        requester: &Requester,
        title: String,
        category: String,
        upload: SpooledUpload,
    ) -> Result<Job, IntakeError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(IntakeError::MissingField("title"));
        }

        let validated = state
            .validator
            .validate(&upload.file_name, &category, upload.size, upload.path())
            .await?;

        let job_id = Uuid::new_v4();
        let key = source_key(requester.user_id, job_id, &upload.file_name);
        state.storage.put_file(&key, upload.path(), &upload.content_type).await?;

        let created = state
            .jobs
            .create(NewJob {
                id: job_id,
                owner_id: requester.user_id,
                title,
                source_key: key.clone(),
                category: validated.category,
                status: JobStatus::Pending,
                approved: requester.is_admin,
            })
            .await;

        let job = match created {
            Ok(job) => job,
            Err(e) => {
                if let Err(cleanup) = state.storage.delete(&key).await {
                    warn!(key = %key, "Failed to remove orphaned source: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            size_bytes = upload.size,
            duration_secs = validated.duration_secs,
            "⬆️ Upload accepted"
        );

        // A full queue leaves the job pending for the sweep.
        if let Err(QueueError::Closed) = enqueue(state, &job) {
            warn!(job_id = %job.id, "Transcode queue closed, job left pending");
        }

        Ok(job)
    }

    /// First half of a direct-to-store upload: checks what can be checked
    /// without the file and hands out a signed URL.
    pub async fn begin_direct_upload(
        state: &AppState,
        requester: &Requester,
        req: DirectUploadRequest,
    ) -> Result<DirectUploadResponse, IntakeError> {
        let category = state
            .validator
            .check_metadata(&req.filename, &req.category, req.size_bytes)?;

        let content_type = match req.content_type.as_deref().map(str::trim).filter(|ct| !ct.is_empty()) {
            Some(declared) => video_content_type(declared)?,
            None => mime_guess::from_path(&req.filename).first_or_octet_stream().to_string(),
        };

        let job_id = Uuid::new_v4();
        let key = source_key(requester.user_id, job_id, &req.filename);
        let upload_url = state.storage.issue_upload_url(&key, &content_type).await?;

        let job = state
            .jobs
            .create(NewJob {
                id: job_id,
                owner_id: requester.user_id,
                title: req.title.trim().to_string(),
                source_key: key,
                category,
                status: JobStatus::Uploading,
                approved: requester.is_admin,
            })
            .await?;

        info!(job_id = %job.id, "Direct upload URL issued");
        Ok(DirectUploadResponse {
            job,
            upload_url,
            content_type,
        })
    }

    /// Second half of a direct upload: the object is probed where it landed.
    /// An object that fails validation is deleted and the job fails.
    pub async fn complete_direct_upload(
        state: &AppState,
        requester: &Requester,
        job_id: Uuid,
    ) -> Result<Job, IntakeError> {
        let job = state
            .jobs
            .find(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))?;

        if !requester.is_admin && job.owner_id != requester.user_id {
            return Err(IntakeError::Forbidden);
        }
        if job.status != JobStatus::Uploading {
            return Err(IntakeError::NotUploading(job_id));
        }

        let staged = match stage_source(state.storage.as_ref(), &job.source_key).await {
            Ok(staged) => staged,
            Err(StorageError::NotFound(_)) => return Err(IntakeError::SourceMissing(job_id)),
            Err(e) => return Err(e.into()),
        };
        let size = tokio::fs::metadata(staged.path()).await?.len();

        let outcome = state
            .validator
            .validate(&job.source_key, job.category.as_str(), size, staged.path())
            .await;
        drop(staged);

        match outcome {
            Ok(_) => {}
            // Our problem, not the file's: leave the job for a retry.
            Err(e @ ValidationError::ProbeUnavailable(_)) => return Err(e.into()),
            Err(e) => {
                warn!(job_id = %job_id, "Direct upload rejected: {}", e);
                if let Err(cleanup) = state.storage.delete(&job.source_key).await {
                    warn!(key = %job.source_key, "Failed to remove rejected upload: {}", cleanup);
                }
                state.jobs.reject_upload(job_id, &e.to_string()).await?;
                return Err(e.into());
            }
        }

        enqueue(state, &job)?;
        info!(job_id = %job_id, size_bytes = size, "⬆️ Direct upload completed");
        Ok(job)
    }
}
