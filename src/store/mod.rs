//! Durable Store (spec §4.A): a transactional key-value store for users,
//! expressions, tasks, and the ready-queue.
//!
//! Modeled as an `async_trait` with a pluggable backend, the same shape as
//! the teacher's `MissionStore` trait (`api/mission_store/mod.rs`) — one
//! trait, one production backend (`sqlite`).

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Expression, Task, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invariant(String),

    #[error(transparent)]
    Backend(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // --- Users ---------------------------------------------------------
    async fn create_user(&self, login: &str, password_hash: &str) -> StoreResult<User>;
    async fn get_user_by_login(&self, login: &str) -> StoreResult<User>;

    // --- Expressions -----------------------------------------------------
    async fn create_expression(&self, user_id: i64, text: &str) -> StoreResult<Expression>;
    async fn get_expression(&self, id: i64) -> StoreResult<Expression>;
    async fn get_user_expressions(&self, user_id: i64) -> StoreResult<Vec<Expression>>;
    async fn delete_expression(&self, id: i64) -> StoreResult<()>;
    async fn update_expression_result(&self, id: i64, result: f64) -> StoreResult<()>;
    async fn mark_expression_error(&self, id: i64) -> StoreResult<()>;

    // --- Tasks -----------------------------------------------------------
    async fn create_task(&self, task: &Task) -> StoreResult<()>;
    async fn get_task(&self, id: Uuid) -> StoreResult<Task>;
    async fn get_tasks_by_expression(&self, expression_id: i64) -> StoreResult<Vec<Task>>;
    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>>;
    async fn update_task_result(&self, id: Uuid, result: f64) -> StoreResult<()>;
    async fn mark_task_error(&self, id: Uuid) -> StoreResult<()>;
    async fn check_dependencies_completed(&self, task_id: Uuid) -> StoreResult<bool>;
    async fn get_dependents(&self, task_id: Uuid) -> StoreResult<Vec<Task>>;

    // --- Task queue --------------------------------------------------------
    /// Insert `task_id` into the ready-queue. Returns `true` if it was
    /// actually inserted, `false` if it was already queued (insert-or-ignore,
    /// per spec §4.A) — callers that count genuine state changes (e.g.
    /// Recovery) rely on this distinction.
    async fn enqueue_ready(&self, task_id: Uuid) -> StoreResult<bool>;
    async fn lease_next(&self) -> StoreResult<Option<Task>>;
}
