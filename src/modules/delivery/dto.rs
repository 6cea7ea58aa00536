use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::modules::jobs::model::{Category, JobStatus};

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub title: String,
    pub category: Category,
    pub processing_status: JobStatus,
    pub playlist_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// Body returned with `202 Accepted` while a video is not ready.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotReadyResponse {
    pub job_id: Uuid,
    pub processing_status: JobStatus,
}
