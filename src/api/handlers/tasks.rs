//! `GET /internal/task`, `GET /internal/task/{id}`,
//! `POST /internal/task/requeue` (spec §4.D, §6).

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::api::routes::AppState;
use crate::api::types::{ProcessedResponse, RequeueRequest, TaskResponse};
use crate::error::{AppError, AppResult};
use crate::scheduler::{self, Submission};

/// Lease the next ready task (`LeaseNext`).
pub async fn lease_task(State(state): State<AppState>) -> AppResult<Json<TaskResponse>> {
    match state.store.lease_next().await? {
        Some(task) => Ok(Json(task)),
        None => Err(AppError::NotFound),
    }
}

/// Fetch a task's current record, so a worker can resolve a dependency
/// argument (`Fetch-by-id`).
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    let task = state.store.get_task(id).await?;
    Ok(Json(task))
}

/// Accept a worker's result (`Submit`).
pub async fn requeue(
    State(state): State<AppState>,
    Json(req): Json<RequeueRequest>,
) -> AppResult<Json<ProcessedResponse>> {
    let submission = match req.status.as_str() {
        "completed" => {
            let result = req
                .result
                .ok_or_else(|| AppError::BadRequest("result is required for completed status".to_string()))?;
            Submission::Completed { result }
        }
        "error" => Submission::Error,
        "pending" => Submission::Requeue,
        other => {
            return Err(AppError::BadRequest(format!("unknown status '{other}'")));
        }
    };

    scheduler::submit(&state.store, req.id, submission).await?;

    Ok(Json(ProcessedResponse { status: "processed" }))
}
