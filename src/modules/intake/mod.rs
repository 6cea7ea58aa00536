use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::post;

pub mod dto;
pub mod handler;
pub mod service;
pub mod validator;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.validator.policy().max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/videos", post(handler::upload_video))
        .route("/videos/direct-upload", post(handler::begin_direct_upload))
        .route("/videos/{id}/complete", post(handler::complete_direct_upload))
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
