//! SQLite-backed `Store` implementation.
//!
//! Grounded on the teacher's `SqliteMissionStore`
//! (`api/mission_store/sqlite.rs`): a schema constant run once via
//! `execute_batch`, an `Arc<tokio::sync::Mutex<Connection>>`, and each
//! trait method doing its work inside `spawn_blocking` with
//! `conn.blocking_lock()` so the single synchronous `rusqlite` connection
//! never blocks the async runtime.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{Expression, ExpressionStatus, Operator, Task, TaskStatus, User};

use super::{Store, StoreError, StoreResult};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    login TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS expressions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    expression_text TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    result REAL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_expressions_user ON expressions(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    expression_id INTEGER NOT NULL,
    arg1 TEXT NOT NULL,
    arg2 TEXT NOT NULL,
    op TEXT NOT NULL,
    op_time_ms INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    result REAL,
    depends_on TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (expression_id) REFERENCES expressions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_expression ON tasks(expression_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS task_queue (
    task_id TEXT PRIMARY KEY NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);
"#;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> anyhow::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let id: String = row.get(0)?;
        let expression_id: i64 = row.get(1)?;
        let arg1: String = row.get(2)?;
        let arg2: String = row.get(3)?;
        let op: String = row.get(4)?;
        let op_time_ms: i64 = row.get(5)?;
        let status: String = row.get(6)?;
        let result: Option<f64> = row.get(7)?;
        let depends_on_json: String = row.get(8)?;

        let depends_on: Vec<Uuid> = serde_json::from_str::<Vec<String>>(&depends_on_json)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();

        Ok(Task {
            id: Uuid::parse_str(&id)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            expression_id,
            arg1,
            arg2,
            operation: op.parse::<Operator>().unwrap_or(Operator::Add),
            op_time_ms: op_time_ms as u64,
            status: status.parse::<TaskStatus>().unwrap_or(TaskStatus::Pending),
            result,
            depends_on,
        })
    }

    fn parse_expression_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Expression> {
        let id: i64 = row.get(0)?;
        let user_id: i64 = row.get(1)?;
        let expression: String = row.get(2)?;
        let status: String = row.get(3)?;
        let result: Option<f64> = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok(Expression {
            id,
            user_id,
            expression,
            status: status.parse::<ExpressionStatus>().unwrap_or(ExpressionStatus::Pending),
            result,
            created_at,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> StoreResult<User> {
        let conn = self.conn.clone();
        let login = login.to_string();
        let password_hash = password_hash.to_string();
        let created_at = Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let result = conn.execute(
                "INSERT INTO users (login, password_hash, created_at) VALUES (?1, ?2, ?3)",
                params![login, password_hash, created_at],
            );
            match result {
                Ok(_) => Ok(User {
                    id: conn.last_insert_rowid(),
                    login,
                    password_hash,
                    created_at,
                }),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict("login already exists".to_string()))
                }
                Err(e) => Err(StoreError::Backend(e)),
            }
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_user_by_login(&self, login: &str) -> StoreResult<User> {
        let conn = self.conn.clone();
        let login = login.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, login, password_hash, created_at FROM users WHERE login = ?1",
                params![login],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::Backend)?
            .ok_or(StoreError::NotFound)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn create_expression(&self, user_id: i64, text: &str) -> StoreResult<Expression> {
        let conn = self.conn.clone();
        let text = text.to_string();
        let created_at = Utc::now().to_rfc3339();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO expressions (user_id, expression_text, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
                params![user_id, text, created_at],
            )?;
            Ok(Expression {
                id: conn.last_insert_rowid(),
                user_id,
                expression: text,
                status: ExpressionStatus::Pending,
                result: None,
                created_at,
            })
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_expression(&self, id: i64) -> StoreResult<Expression> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, user_id, expression_text, status, result, created_at FROM expressions WHERE id = ?1",
                params![id],
                Self::parse_expression_row,
            )
            .optional()
            .map_err(StoreError::Backend)?
            .ok_or(StoreError::NotFound)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_user_expressions(&self, user_id: i64) -> StoreResult<Vec<Expression>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, user_id, expression_text, status, result, created_at FROM expressions WHERE user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![user_id], Self::parse_expression_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn delete_expression(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM expressions WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn update_expression_result(&self, id: i64, result: f64) -> StoreResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE expressions SET result = ?1, status = 'completed' WHERE id = ?2",
                params![result, id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn mark_expression_error(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("UPDATE expressions SET status = 'error' WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        let conn = self.conn.clone();
        let task = task.clone();
        let depends_on_json = serde_json::to_string(
            &task.depends_on.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        )
        .expect("uuid vec always serializes");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO tasks (id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id.to_string(),
                    task.expression_id,
                    task.arg1,
                    task.arg2,
                    task.operation.symbol(),
                    task.op_time_ms as i64,
                    task.status.as_str(),
                    task.result,
                    depends_on_json,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Task> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on FROM tasks WHERE id = ?1",
                params![id.to_string()],
                Self::parse_task_row,
            )
            .optional()
            .map_err(StoreError::Backend)?
            .ok_or(StoreError::NotFound)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_tasks_by_expression(&self, expression_id: i64) -> StoreResult<Vec<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on FROM tasks WHERE expression_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![expression_id], Self::parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on FROM tasks WHERE status = 'pending'",
            )?;
            let rows = stmt
                .query_map([], Self::parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn update_task_result(&self, id: Uuid, result: f64) -> StoreResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE tasks SET result = ?1, status = 'completed' WHERE id = ?2",
                params![result, id.to_string()],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn mark_task_error(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("UPDATE tasks SET status = 'error' WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn check_dependencies_completed(&self, task_id: Uuid) -> StoreResult<bool> {
        let task = self.get_task(task_id).await?;
        if task.depends_on.is_empty() {
            return Ok(true);
        }

        let conn = self.conn.clone();
        let dep_ids = task.depends_on.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut completed: HashSet<Uuid> = HashSet::new();
            for dep in &dep_ids {
                let status: Option<String> = conn
                    .query_row("SELECT status FROM tasks WHERE id = ?1", params![dep.to_string()], |row| row.get(0))
                    .optional()?;
                if status.as_deref() == Some("completed") {
                    completed.insert(*dep);
                }
            }
            Ok(dep_ids.iter().all(|d| completed.contains(d)))
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn get_dependents(&self, task_id: Uuid) -> StoreResult<Vec<Task>> {
        let conn = self.conn.clone();
        let needle = task_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on FROM tasks WHERE status = 'pending'",
            )?;
            let rows = stmt
                .query_map([], Self::parse_task_row)?
                .collect::<Result<Vec<Task>, _>>()?
                .into_iter()
                .filter(|t| t.depends_on.iter().any(|d| d.to_string() == needle))
                .collect();
            Ok(rows)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn enqueue_ready(&self, task_id: Uuid) -> StoreResult<bool> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let status: Option<String> = conn
                .query_row("SELECT status FROM tasks WHERE id = ?1", params![task_id.to_string()], |row| row.get(0))
                .optional()?;

            match status.as_deref() {
                None => return Err(StoreError::NotFound),
                Some("pending") => {}
                Some(other) => {
                    return Err(StoreError::Invariant(format!(
                        "task {task_id} has status {other}, cannot enqueue"
                    )))
                }
            }

            conn.execute(
                "INSERT INTO task_queue (task_id) VALUES (?1) ON CONFLICT (task_id) DO NOTHING",
                params![task_id.to_string()],
            )?;
            Ok(conn.changes() > 0)
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }

    async fn lease_next(&self) -> StoreResult<Option<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;

            let task_id: Option<String> = tx
                .query_row("SELECT task_id FROM task_queue LIMIT 1", [], |row| row.get(0))
                .optional()?;

            let Some(task_id) = task_id else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute("DELETE FROM task_queue WHERE task_id = ?1", params![task_id])?;

            let task = tx.query_row(
                "SELECT id, expression_id, arg1, arg2, op, op_time_ms, status, result, depends_on FROM tasks WHERE id = ?1",
                params![task_id],
                Self::parse_task_row,
            )?;

            tx.commit()?;
            Ok(Some(task))
        })
        .await
        .map_err(|e| StoreError::Other(e.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_login() {
        let store = store().await;
        store.create_user("alice", "hash").await.unwrap();
        let err = store.create_user("alice", "hash2").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn lease_next_is_fifo_and_empty_when_drained() {
        let store = store().await;
        let user = store.create_user("bob", "hash").await.unwrap();
        let expr = store.create_expression(user.id, "2+3").await.unwrap();

        let task = Task {
            id: Uuid::new_v4(),
            expression_id: expr.id,
            arg1: "2".into(),
            arg2: "3".into(),
            operation: Operator::Add,
            op_time_ms: 1000,
            status: TaskStatus::Pending,
            result: None,
            depends_on: vec![],
        };
        store.create_task(&task).await.unwrap();
        store.enqueue_ready(task.id).await.unwrap();

        let leased = store.lease_next().await.unwrap().unwrap();
        assert_eq!(leased.id, task.id);
        assert!(store.lease_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_ready_is_idempotent() {
        let store = store().await;
        let user = store.create_user("carol", "hash").await.unwrap();
        let expr = store.create_expression(user.id, "2+3").await.unwrap();
        let task = Task {
            id: Uuid::new_v4(),
            expression_id: expr.id,
            arg1: "2".into(),
            arg2: "3".into(),
            operation: Operator::Add,
            op_time_ms: 1000,
            status: TaskStatus::Pending,
            result: None,
            depends_on: vec![],
        };
        store.create_task(&task).await.unwrap();
        assert!(store.enqueue_ready(task.id).await.unwrap());
        assert!(!store.enqueue_ready(task.id).await.unwrap());

        assert!(store.lease_next().await.unwrap().is_some());
        assert!(store.lease_next().await.unwrap().is_none());
    }
}
