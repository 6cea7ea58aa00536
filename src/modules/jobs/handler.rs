use super::dto::ApprovalRequest;
use super::model::Job;
use super::repository::JobError;
use super::service::{JobService, ReprocessError};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match e {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::InvalidTransition { .. } | JobError::Superseded { .. } | JobError::Duplicate(_) => {
                StatusCode::CONFLICT
            }
            JobError::Corrupt(_) | JobError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(e.to_string(), status)
    }
}

impl From<ReprocessError> for ApiError {
    fn from(e: ReprocessError) -> Self {
        match e {
            ReprocessError::NotFound(_) => ApiError(e.to_string(), StatusCode::NOT_FOUND),
            ReprocessError::AlreadyProcessing(_) | ReprocessError::NotReprocessable { .. } => {
                ApiError(e.to_string(), StatusCode::CONFLICT)
            }
            ReprocessError::Cleanup(_) => ApiError::internal(e),
            ReprocessError::Job(inner) => inner.into(),
        }
    }
}

/// Reset a failed (or stalled) job and queue it again. Admin only.
#[utoipa::path(
    post,
    path = "/api/v1/videos/{id}/reprocess",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Job queued for reprocessing", body = ApiResponse<Job>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job is processing or not in a reprocessable state")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn reprocess_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = JobService::reprocess(&state, id).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Job queued for reprocessing"),
        StatusCode::ACCEPTED,
    ))
}

/// Set the moderation flag that opens a video to every viewer. Admin only.
#[utoipa::path(
    post,
    path = "/api/v1/videos/{id}/approval",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    request_body = ApprovalRequest,
    responses(
        (status = 200, description = "Moderation flag updated", body = ApiResponse<Job>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs",
    security(("bearer_auth" = []))
)]
pub async fn set_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApprovalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = JobService::set_approved(&state, id, payload.approved).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Moderation flag updated"),
        StatusCode::OK,
    ))
}
