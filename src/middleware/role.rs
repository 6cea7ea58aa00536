use crate::common::response::ApiError;
use crate::middleware::auth::Requester;
use axum::{
    extract::{Extension, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

pub async fn admin_guard(
    Extension(requester): Extension<Requester>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !requester.is_admin {
        return Err(ApiError(
            "Forbidden: Admin access required".to_string(),
            StatusCode::FORBIDDEN,
        ));
    }

    Ok(next.run(req).await)
}
