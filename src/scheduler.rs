//! Scheduler Core (spec §4.C) and Recovery (spec §4.F).
//!
//! Three entry points: admit a freshly-compiled expression's tasks,
//! process a worker's submission, and rehydrate the ready-queue at boot.
//! Grounded on the original's `RequeueTaskHandler`
//! (`internal/handlers/tasks.go`), translated from one big HTTP handler
//! into three composable functions the API layer calls into.

use uuid::Uuid;

use crate::compiler::{self, CompiledExpression};
use crate::model::Task;
use crate::store::{Store, StoreResult};

/// Persist a compiled expression's tasks and enqueue every dependency-free
/// (root) task. Called right after [`crate::compiler::compile`] succeeds.
pub async fn admit_expression(
    store: &dyn Store,
    expression_id: i64,
    compiled: CompiledExpression,
) -> StoreResult<()> {
    for task in &compiled.tasks {
        let mut task = task.clone();
        task.expression_id = expression_id;
        store.create_task(&task).await?;
    }

    for task in &compiled.tasks {
        if task.depends_on.is_empty() {
            store.enqueue_ready(task.id).await?;
        }
    }

    Ok(())
}

/// What the caller reported for a task it held a lease on.
pub enum Submission {
    Completed { result: f64 },
    Error,
    /// The worker is giving the lease back without having made progress.
    Requeue,
}

/// Process a worker's submission for `task_id` (spec §4.C entry point 2).
pub async fn submit(store: &dyn Store, task_id: Uuid, submission: Submission) -> StoreResult<()> {
    let task = store.get_task(task_id).await?;

    match submission {
        Submission::Completed { result } => {
            store.update_task_result(task_id, result).await?;
            finalize_expression_if_complete(store, task.expression_id).await?;
            enqueue_newly_ready_dependents(store, task_id).await?;
        }
        Submission::Error => {
            store.mark_task_error(task_id).await?;
            store.mark_expression_error(task.expression_id).await?;
        }
        Submission::Requeue => {
            store.enqueue_ready(task_id).await?;
        }
    }

    Ok(())
}

/// If every task belonging to `expression_id` is completed, set the
/// expression's result from the terminal task and mark it completed.
/// Idempotent: re-running after the expression is already completed is a
/// no-op (the store's `UPDATE ... SET status = 'completed'` is safe to
/// repeat with the same result).
async fn finalize_expression_if_complete(store: &dyn Store, expression_id: i64) -> StoreResult<()> {
    let tasks = store.get_tasks_by_expression(expression_id).await?;
    let all_completed = !tasks.is_empty()
        && tasks.iter().all(|t| matches!(t.status, crate::model::TaskStatus::Completed));

    if !all_completed {
        return Ok(());
    }

    let terminal_id = match compiler::terminal_id(&tasks) {
        Some(id) => id,
        None => {
            tracing::error!(
                expression_id,
                "expression has no unique terminal task; compiler invariant violated"
            );
            return Ok(());
        }
    };

    let terminal: &Task = tasks.iter().find(|t| t.id == terminal_id).expect("terminal id is in tasks");
    let Some(result) = terminal.result else {
        tracing::error!(expression_id, %terminal_id, "terminal task completed with no result");
        return Ok(());
    };

    store.update_expression_result(expression_id, result).await?;
    Ok(())
}

/// For each pending dependent of `task_id`, enqueue it if all of its
/// dependencies are now completed. `EnqueueReady`'s insert-or-ignore
/// semantics make this safe to call redundantly from concurrent
/// completions of sibling dependencies (spec §5).
async fn enqueue_newly_ready_dependents(store: &dyn Store, task_id: Uuid) -> StoreResult<()> {
    let dependents = store.get_dependents(task_id).await?;
    for dep in dependents {
        if store.check_dependencies_completed(dep.id).await? {
            store.enqueue_ready(dep.id).await?;
        }
    }
    Ok(())
}

/// Rehydrate the ready-queue from durable pending tasks whose dependencies
/// are already satisfied (spec §4.F). Run once at boot, before the server
/// accepts traffic. Idempotent: `EnqueueReady` no-ops on a task already
/// queued (spec §8's "Recovery idempotence").
pub async fn recover(store: &dyn Store) -> StoreResult<usize> {
    let pending = store.get_pending_tasks().await?;
    let mut restored = 0;

    for task in pending {
        if store.check_dependencies_completed(task.id).await? && store.enqueue_ready(task.id).await? {
            restored += 1;
        }
    }

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationTimings;
    use crate::store::SqliteStore;

    async fn setup() -> (SqliteStore, i64) {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let user = store.create_user("scheduler-test", "hash").await.unwrap();
        let expr = store.create_expression(user.id, "(2+3)*4").await.unwrap();
        (store, expr.id)
    }

    #[tokio::test]
    async fn completing_root_enqueues_its_dependent() {
        let (store, expr_id) = setup().await;
        let compiled = compiler::compile("(2+3)*4", &OperationTimings::default()).unwrap();
        admit_expression(&store, expr_id, compiled).await.unwrap();

        let tasks = store.get_tasks_by_expression(expr_id).await.unwrap();
        let add = tasks.iter().find(|t| t.depends_on.is_empty()).unwrap();
        let mul = tasks.iter().find(|t| !t.depends_on.is_empty()).unwrap();

        // Only the addition is ready initially.
        let leased = store.lease_next().await.unwrap().unwrap();
        assert_eq!(leased.id, add.id);
        assert!(store.lease_next().await.unwrap().is_none());

        submit(&store, add.id, Submission::Completed { result: 5.0 }).await.unwrap();

        let leased = store.lease_next().await.unwrap().unwrap();
        assert_eq!(leased.id, mul.id);

        submit(&store, mul.id, Submission::Completed { result: 20.0 }).await.unwrap();

        let expr = store.get_expression(expr_id).await.unwrap();
        assert_eq!(expr.result, Some(20.0));
        assert_eq!(expr.status.as_str(), "completed");
    }

    #[tokio::test]
    async fn recovery_restores_ready_dependents_after_partial_progress() {
        let (store, expr_id) = setup().await;
        let compiled = compiler::compile("(2+3)*4", &OperationTimings::default()).unwrap();
        admit_expression(&store, expr_id, compiled).await.unwrap();

        let tasks = store.get_tasks_by_expression(expr_id).await.unwrap();
        let add = tasks.iter().find(|t| t.depends_on.is_empty()).unwrap();
        let mul = tasks.iter().find(|t| !t.depends_on.is_empty()).unwrap();

        // Drain the queue (simulating a crash right after the lease, before
        // a submit) then complete the addition directly through the store,
        // bypassing submit() to simulate an out-of-band completion.
        store.lease_next().await.unwrap();
        store.update_task_result(add.id, 5.0).await.unwrap();

        let restored = recover(&store).await.unwrap();
        assert_eq!(restored, 1);

        let leased = store.lease_next().await.unwrap().unwrap();
        assert_eq!(leased.id, mul.id);
    }

    #[tokio::test]
    async fn recovery_is_idempotent_on_a_consistent_state() {
        let (store, expr_id) = setup().await;
        let compiled = compiler::compile("2+3", &OperationTimings::default()).unwrap();
        admit_expression(&store, expr_id, compiled).await.unwrap();

        let first = recover(&store).await.unwrap();
        let second = recover(&store).await.unwrap();
        // The root task is already queued from admit_expression, so
        // recovery finds nothing new to restore either time.
        assert_eq!(first, 0);
        assert_eq!(second, 0);
    }
}
