use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

use crate::modules::delivery::dto::{JobStatusResponse, NotReadyResponse};
use crate::modules::intake::dto::{DirectUploadRequest, DirectUploadResponse, UploadForm};
use crate::modules::jobs::dto::ApprovalRequest;
use crate::modules::jobs::model::{Category, Job, JobStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::intake::handler::upload_video,
        crate::modules::intake::handler::begin_direct_upload,
        crate::modules::intake::handler::complete_direct_upload,
        crate::modules::delivery::handler::get_status,
        crate::modules::delivery::handler::get_playlist,
        crate::modules::delivery::handler::get_segment,
        crate::modules::delivery::handler::get_thumbnail,
        crate::modules::jobs::handler::reprocess_job,
        crate::modules::jobs::handler::set_approval,
    ),
    components(
        schemas(
            Job, JobStatus, Category,
            UploadForm, DirectUploadRequest, DirectUploadResponse,
            JobStatusResponse, NotReadyResponse,
            ApprovalRequest,
        )
    ),
    tags(
        (name = "Videos", description = "Upload intake"),
        (name = "Delivery", description = "Status and HLS playback"),
        (name = "Jobs", description = "Administrative job control")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
