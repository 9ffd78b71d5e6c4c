//! Centralized error type for the HTTP surface.
//!
//! Every handler converts its first internal error into exactly one
//! response via `AppError`'s `IntoResponse` impl, so no handler needs to
//! hand-roll a `{"error": ...}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("invalid_syntax: {0}")]
    InvalidSyntax(String),

    #[error("division_by_zero")]
    DivisionByZero,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound => AppError::NotFound,
            crate::store::StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<crate::compiler::CompileError> for AppError {
    fn from(err: crate::compiler::CompileError) -> Self {
        match err {
            crate::compiler::CompileError::DivisionByZero => AppError::DivisionByZero,
            crate::compiler::CompileError::InvalidSyntax(msg) => AppError::InvalidSyntax(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidSyntax(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, format!("invalid expression: {msg}"))
            }
            AppError::DivisionByZero => {
                (StatusCode::UNPROCESSABLE_ENTITY, "division by zero".to_string())
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
