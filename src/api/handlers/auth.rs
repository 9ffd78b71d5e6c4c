//! `POST /api/v1/register`, `POST /api/v1/login` (spec §6).

use axum::{extract::State, Json};

use crate::api::routes::AppState;
use crate::api::types::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use crate::error::{AppError, AppResult};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    if req.login.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("login and password are required".to_string()));
    }

    let hash = crate::auth::hash_password(&req.password);
    state.store.create_user(&req.login, &hash).await?;

    Ok(Json(RegisterResponse { status: "OK" }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = state
        .store
        .get_user_by_login(&req.login)
        .await
        .map_err(|_| AppError::Unauthorized)?;

    if !crate::auth::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let token = crate::auth::generate_token(user.id, &state.config.jwt_secret, state.config.jwt_ttl_hours)
        .map_err(AppError::Internal)?;

    Ok(Json(LoginResponse { token }))
}
