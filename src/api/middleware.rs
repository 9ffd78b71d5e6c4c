//! Bearer-token auth middleware.
//!
//! Grounded on the original's `middleware.AuthMiddleware`
//! (`internal/middleware/auth.go`): reject requests with a missing or
//! invalid `Authorization` header before they reach a handler, and inject
//! the authenticated caller's id for handlers to read.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::routes::AppState;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let user_id = crate::auth::parse_token(token, &state.config.jwt_secret)
        .map_err(|_| AppError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}
