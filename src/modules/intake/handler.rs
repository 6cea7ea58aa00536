use super::dto::{DirectUploadRequest, DirectUploadResponse, UploadForm};
use super::service::{IntakeError, IntakeService};
use super::validator::ValidationError;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::{SpoolError, SpooledUpload, spool_field};
use crate::infrastructure::storage::StorageError;
use crate::middleware::auth::Requester;
use crate::modules::jobs::model::Job;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let status = match e {
            ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ValidationError::ProbeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError(e.to_string(), status)
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::Validation(inner) => inner.into(),
            IntakeError::Job(inner) => inner.into(),
            IntakeError::MissingField(_) | IntakeError::BadRequest(_) | IntakeError::SourceMissing(_) => {
                ApiError::bad_request(e)
            }
            IntakeError::Forbidden => ApiError(e.to_string(), StatusCode::FORBIDDEN),
            IntakeError::NotUploading(_) => ApiError(e.to_string(), StatusCode::CONFLICT),
            IntakeError::Queue(_) => {
                ApiError(e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
            }
            IntakeError::Storage(StorageError::Unsupported(_)) => {
                ApiError(e.to_string(), StatusCode::NOT_IMPLEMENTED)
            }
            IntakeError::Storage(_) | IntakeError::Io(_) => ApiError::internal(e),
        }
    }
}

/// Upload a video for transcoding
/// Multipart fields: `title`, `category`, `video`.
#[utoipa::path(
    post,
    path = "/api/v1/videos",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Upload accepted, transcoding queued", body = ApiResponse<Job>),
        (status = 400, description = "Validation failed"),
        (status = 413, description = "File too large"),
        (status = 503, description = "Media probe unavailable")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn upload_video(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut title: Option<String> = None;
    let mut category: Option<String> = None;
    let mut upload: Option<SpooledUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => title = Some(field.text().await.map_err(ApiError::bad_request)?),
            "category" => category = Some(field.text().await.map_err(ApiError::bad_request)?),
            "video" => {
                let file_name = field.file_name().unwrap_or("video.mp4").to_string();
                // Reject before reading a single byte of the body.
                state.validator.check_extension(&file_name)?;
                info!("Receiving upload {} from {}", file_name, requester.user_id);

                let spooled = spool_field(
                    field,
                    &state.config.storage.staging_dir,
                    state.validator.policy().max_upload_bytes,
                )
                .await
                .map_err(|e| match e {
                    SpoolError::TooLarge { limit_bytes } => {
                        ApiError::from(ValidationError::FileTooLarge { limit_bytes })
                    }
                    SpoolError::Stream(_) => ApiError::bad_request(e),
                    SpoolError::Io(_) => ApiError::internal(e),
                })?;
                upload = Some(spooled);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or(IntakeError::MissingField("video"))?;
    let category = category.ok_or(IntakeError::MissingField("category"))?;
    let title = title.ok_or(IntakeError::MissingField("title"))?;

    let job = IntakeService::submit_upload(&state, &requester, title, category, upload).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Video uploaded, processing queued"),
        StatusCode::ACCEPTED,
    ))
}

/// Request a signed URL for uploading straight to object storage
#[utoipa::path(
    post,
    path = "/api/v1/videos/direct-upload",
    request_body = DirectUploadRequest,
    responses(
        (status = 201, description = "Upload URL issued", body = ApiResponse<DirectUploadResponse>),
        (status = 400, description = "Validation failed"),
        (status = 413, description = "File too large"),
        (status = 501, description = "Storage backend cannot issue upload URLs")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn begin_direct_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(payload): Json<DirectUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate()?;
    let ticket = IntakeService::begin_direct_upload(&state, &requester, payload).await?;
    Ok(ApiSuccess(
        ApiResponse::success(ticket, "Upload URL issued"),
        StatusCode::CREATED,
    ))
}

/// Confirm a direct upload finished; the object is validated and queued
#[utoipa::path(
    post,
    path = "/api/v1/videos/{id}/complete",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Upload validated, transcoding queued", body = ApiResponse<Job>),
        (status = 400, description = "Validation failed, upload discarded"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job is not waiting for an upload")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn complete_direct_upload(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = IntakeService::complete_direct_upload(&state, &requester, id).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Upload completed, processing queued"),
        StatusCode::ACCEPTED,
    ))
}
