//! Wire-level request/response DTOs (spec §6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Expression, Task};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub expression: String,
}

#[derive(Debug, Serialize)]
pub struct CalculateResponse {
    pub id: i64,
}

pub type ExpressionResponse = Expression;
pub type TaskResponse = Task;

/// Body of `POST /internal/task/requeue`.
#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    pub id: Uuid,
    pub result: Option<f64>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessedResponse {
    pub status: &'static str,
}
