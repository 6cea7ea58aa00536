use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;

pub mod dto;
pub mod handler;
pub mod service;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/videos/{id}/status", get(handler::get_status))
        .route("/videos/{id}/hls/playlist.m3u8", get(handler::get_playlist))
        .route("/videos/{id}/hls/{segment}", get(handler::get_segment))
        .route("/videos/{id}/thumbnail", get(handler::get_thumbnail))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
