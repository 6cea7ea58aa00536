use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::modules::jobs::model::Job;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DirectUploadRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
    /// `curricular` or `enrichment`.
    pub category: String,
    #[validate(length(min = 1, max = 255, message = "Filename is required"))]
    pub filename: String,
    #[validate(range(min = 1, message = "Size must be positive"))]
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DirectUploadResponse {
    pub job: Job,
    /// Signed URL to `PUT` the file to.
    pub upload_url: String,
    pub content_type: String,
}

/// Documents the multipart form accepted by the upload endpoint.
#[derive(ToSchema)]
pub struct UploadForm {
    pub title: String,
    pub category: String,
    #[schema(format = Binary)]
    pub video: String,
}
