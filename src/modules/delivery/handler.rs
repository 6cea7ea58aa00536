use super::dto::{JobStatusResponse, NotReadyResponse};
use super::service::{Delivery, DeliveryError, DeliveryService};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::media::manifest::{
    PLAYLIST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE, THUMBNAIL_CONTENT_TYPE,
};
use crate::middleware::auth::Requester;
use crate::state::AppState;
use axum::{
    extract::{Extension, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use uuid::Uuid;

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        let status = match e {
            DeliveryError::NotFound(_) | DeliveryError::SegmentNotFound(_) => StatusCode::NOT_FOUND,
            DeliveryError::Forbidden => StatusCode::FORBIDDEN,
            DeliveryError::InvalidSegment(_) => StatusCode::BAD_REQUEST,
            DeliveryError::Job(_) | DeliveryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(e.to_string(), status)
    }
}

fn serve(id: Uuid, delivery: Delivery<Bytes>, content_type: &'static str, cache_control: &'static str) -> Response {
    match delivery {
        Delivery::Ready(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, cache_control),
            ],
            bytes,
        )
            .into_response(),
        Delivery::NotReady(status) => ApiSuccess(
            ApiResponse::success(
                NotReadyResponse {
                    job_id: id,
                    processing_status: status,
                },
                "Video is not ready yet",
            ),
            StatusCode::ACCEPTED,
        )
        .into_response(),
    }
}

/// Processing status of a video, with playable URLs once ready
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/status",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Current status", body = ApiResponse<JobStatusResponse>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn get_status(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = DeliveryService::from(&state).get_status(id, &requester).await?;
    Ok(ApiSuccess(
        ApiResponse::success(status, "Status retrieved successfully"),
        StatusCode::OK,
    ))
}

/// HLS manifest of a ready video
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/hls/playlist.m3u8",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Manifest", content_type = "application/vnd.apple.mpegurl"),
        (status = 202, description = "Not ready yet", body = ApiResponse<NotReadyResponse>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn get_playlist(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let delivery = DeliveryService::from(&state).get_playlist(id, &requester).await?;
    Ok(serve(id, delivery, PLAYLIST_CONTENT_TYPE, "no-cache"))
}

/// One media segment of a ready video
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/hls/{segment}",
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ("segment" = String, Path, description = "Segment file name, e.g. segment_000.ts")
    ),
    responses(
        (status = 200, description = "Segment", content_type = "video/mp2t"),
        (status = 202, description = "Not ready yet", body = ApiResponse<NotReadyResponse>),
        (status = 400, description = "Invalid segment name"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn get_segment(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path((id, segment)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let delivery = DeliveryService::from(&state)
        .get_segment(id, &segment, &requester)
        .await?;
    // Reprocessing republishes under the same names.
    Ok(serve(id, delivery, SEGMENT_CONTENT_TYPE, "private, max-age=300"))
}

/// Poster frame of a ready video
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/thumbnail",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Thumbnail", content_type = "image/jpeg"),
        (status = 202, description = "Not ready yet", body = ApiResponse<NotReadyResponse>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let delivery = DeliveryService::from(&state).get_thumbnail(id, &requester).await?;
    Ok(serve(id, delivery, THUMBNAIL_CONTENT_TYPE, "private, max-age=300"))
}
