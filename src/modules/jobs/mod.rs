use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::post;

pub mod dto;
pub mod handler;
pub mod layout;
pub mod memory;
pub mod model;
pub mod repository;
pub mod service;

pub use memory::InMemoryJobStore;
pub use repository::{JobError, JobStore, PgJobStore};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/videos/{id}/reprocess", post(handler::reprocess_job))
        .route("/videos/{id}/approval", post(handler::set_approval))
        .route_layer(middleware::from_fn(crate::middleware::role::admin_guard))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
