//! `POST /api/v1/calculate`, `GET /api/v1/expressions`,
//! `GET /api/v1/expressions/{id}` (spec §4.E, §6).

use axum::{
    extract::{Extension, Path, State},
    Json,
};

use crate::api::middleware::AuthUser;
use crate::api::routes::AppState;
use crate::api::types::{CalculateRequest, CalculateResponse, ExpressionResponse};
use crate::compiler;
use crate::error::{AppError, AppResult};
use crate::scheduler;

pub async fn calculate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CalculateRequest>,
) -> AppResult<(axum::http::StatusCode, Json<CalculateResponse>)> {
    if req.expression.trim().is_empty() {
        return Err(AppError::BadRequest("expression is required".to_string()));
    }

    let expr = state.store.create_expression(user.user_id, &req.expression).await?;

    let compiled = match compiler::compile(&req.expression, &state.config.timings) {
        Ok(compiled) => compiled,
        Err(err) => {
            // Compilation failed after the expression row was created:
            // delete it so a failed expression never persists (spec §3, §7).
            let _ = state.store.delete_expression(expr.id).await;
            return Err(err.into());
        }
    };

    scheduler::admit_expression(&state.store, expr.id, compiled).await?;

    Ok((axum::http::StatusCode::CREATED, Json(CalculateResponse { id: expr.id })))
}

pub async fn list_expressions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<Json<Vec<ExpressionResponse>>> {
    let expressions = state.store.get_user_expressions(user.user_id).await?;
    Ok(Json(expressions))
}

pub async fn get_expression(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ExpressionResponse>> {
    let expr = state.store.get_expression(id).await?;
    if expr.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }
    Ok(Json(expr))
}
