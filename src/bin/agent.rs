//! exprmesh-agent — external worker process.
//!
//! Polls `GET /internal/task` for ready work, resolves any dependency
//! arguments via `GET /internal/task/{id}`, executes the operation locally,
//! and reports back through `POST /internal/task/requeue`. Runs
//! `COMPUTING_POWER` independent polling loops concurrently, the same shape
//! as the original agent's `for i := 0..computingPower { go StartAgent() }`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use exprmesh::config::AgentConfig;
use exprmesh::model::{Operator, Task, TaskStatus};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exprmesh_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env()?;
    info!(
        base_url = %config.base_url,
        computing_power = config.computing_power,
        "starting agent"
    );

    let client = Client::new();
    let mut loops = Vec::with_capacity(config.computing_power);
    for worker_id in 0..config.computing_power {
        let client = client.clone();
        let config = config.clone();
        loops.push(tokio::spawn(async move {
            poll_loop(worker_id, client, config).await;
        }));
    }

    for handle in loops {
        let _ = handle.await;
    }

    Ok(())
}

/// One independent polling loop: lease, resolve, execute, submit, repeat.
async fn poll_loop(worker_id: usize, client: Client, config: AgentConfig) {
    loop {
        match lease_and_run(&client, &config).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(config.poll_interval).await,
            Err(err) => {
                warn!(worker_id, error = %err, "poll iteration failed");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

/// Leases at most one task and drives it to completion. Returns `Ok(false)`
/// when there was nothing to lease, so the caller can back off.
async fn lease_and_run(client: &Client, config: &AgentConfig) -> Result<bool> {
    let task = match lease_task(client, config).await? {
        Some(task) => task,
        None => return Ok(false),
    };

    info!(
        task_id = %task.id,
        operation = task.operation.symbol(),
        "leased task"
    );

    match resolve_and_execute(client, config, &task).await {
        Ok(result) => submit_result(client, config, task.id, result).await?,
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "task execution failed, reporting error status");
            submit_error(client, config, task.id).await?;
        }
    }

    Ok(true)
}

async fn lease_task(client: &Client, config: &AgentConfig) -> Result<Option<Task>> {
    let mut req = client.get(format!("{}/internal/task", config.base_url));
    if let Some(token) = &config.bearer_token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.context("fetching next task")?;

    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !resp.status().is_success() {
        return Err(anyhow!("lease failed with status {}", resp.status()));
    }

    let task: Task = resp.json().await.context("decoding leased task")?;
    Ok(Some(task))
}

async fn fetch_task(client: &Client, config: &AgentConfig, id: Uuid) -> Result<Task> {
    let mut req = client.get(format!("{}/internal/task/{}", config.base_url, id));
    if let Some(token) = &config.bearer_token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.context("fetching dependency task")?;
    if !resp.status().is_success() {
        return Err(anyhow!("fetching task {id} failed with status {}", resp.status()));
    }
    resp.json().await.context("decoding dependency task")
}

/// Resolves `arg1`/`arg2` (either a literal or a dependency task id),
/// applies the operator, and sleeps for the operator's simulated cost
/// before returning — mirrors the reference agent's `time.Sleep`.
async fn resolve_and_execute(client: &Client, config: &AgentConfig, task: &Task) -> Result<f64> {
    let mut cache: HashMap<Uuid, f64> = HashMap::new();

    let arg1 = resolve_argument(client, config, &task.arg1, &mut cache).await?;
    let arg2 = resolve_argument(client, config, &task.arg2, &mut cache).await?;

    if task.operation == Operator::Div && arg2 == 0.0 {
        return Err(anyhow!("division by zero"));
    }

    tokio::time::sleep(Duration::from_millis(task.op_time_ms)).await;

    Ok(task.operation.apply(arg1, arg2))
}

async fn resolve_argument(
    client: &Client,
    config: &AgentConfig,
    arg: &str,
    cache: &mut HashMap<Uuid, f64>,
) -> Result<f64> {
    if let Ok(dep_id) = arg.parse::<Uuid>() {
        if let Some(result) = cache.get(&dep_id) {
            return Ok(*result);
        }
        let dep = fetch_task(client, config, dep_id).await?;
        if dep.status != TaskStatus::Completed {
            return Err(anyhow!("dependency {dep_id} is not completed yet"));
        }
        let result = dep
            .result
            .ok_or_else(|| anyhow!("dependency {dep_id} marked completed without a result"))?;
        cache.insert(dep_id, result);
        return Ok(result);
    }

    arg.parse::<f64>()
        .with_context(|| format!("argument '{arg}' is neither a task id nor a number"))
}

async fn submit_result(client: &Client, config: &AgentConfig, task_id: Uuid, result: f64) -> Result<()> {
    submit(client, config, task_id, Some(result), "completed").await
}

async fn submit_error(client: &Client, config: &AgentConfig, task_id: Uuid) -> Result<()> {
    submit(client, config, task_id, None, "error").await
}

async fn submit(
    client: &Client,
    config: &AgentConfig,
    task_id: Uuid,
    result: Option<f64>,
    status: &str,
) -> Result<()> {
    let mut req = client
        .post(format!("{}/internal/task/requeue", config.base_url))
        .json(&json!({ "id": task_id, "result": result, "status": status }));
    if let Some(token) = &config.bearer_token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.context("submitting task result")?;
    if !resp.status().is_success() {
        return Err(anyhow!("submitting result for {task_id} failed with status {}", resp.status()));
    }
    Ok(())
}
