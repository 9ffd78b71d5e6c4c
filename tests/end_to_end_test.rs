//! End-to-end HTTP surface tests, exercising the router the same way a
//! real client would: register, log in, submit an expression, and drain
//! it through the worker protocol. Grounded on the corpus's
//! request-through-router integration style (e.g.
//! `odgrim-abathur-swarm/tests/database_test.rs` drives a real connection
//! rather than mocking it) combined with axum 0.7's standard
//! `tower::ServiceExt::oneshot` test pattern.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use exprmesh::api::routes::{router, AppState};
use exprmesh::config::Config;
use exprmesh::store::{SqliteStore, Store};

async fn test_app(db_path: &str) -> axum::Router {
    let store = SqliteStore::new(db_path).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(store);
    exprmesh::scheduler::recover(store.as_ref()).await.unwrap();
    let config = Config::for_tests(db_path);
    router(AppState { store, config })
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn json_post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn auth_get(path: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn auth_post(path: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register_and_login(app: &axum::Router, login: &str) -> String {
    let (status, _) = send(
        app.clone(),
        json_post("/api/v1/register", json!({ "login": login, "password": "hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app.clone(),
        json_post("/api/v1/login", json!({ "login": login, "password": "hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

/// Scenario 1 (spec §8): `2+3` submits as one dependency-free task and
/// completes with result 5.0 once a worker submits it.
#[tokio::test]
async fn simple_addition_completes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let token = register_and_login(&app, "alice").await;

    let (status, body) = send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "2+3" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let expr_id = body["id"].as_i64().unwrap();

    let (status, task) = send(app.clone(), auth_get("/internal/task", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(task["depends_on"].as_array().unwrap().is_empty());
    let task_id = task["id"].as_str().unwrap().to_string();

    // No second task is ready yet.
    let (status, _) = send(app.clone(), auth_get("/internal/task", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app.clone(),
        auth_post("/internal/task/requeue", &token, json!({ "id": task_id, "result": 5.0, "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, expr) = send(app.clone(), auth_get(&format!("/api/v1/expressions/{expr_id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expr["status"], "completed");
    assert_eq!(expr["result"], 5.0);
}

/// Scenario 2 (spec §8): `(2+3)*4` enqueues the addition first; the
/// multiplication becomes ready only once it completes.
#[tokio::test]
async fn parenthesized_multiply_waits_for_its_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let token = register_and_login(&app, "bob").await;

    let (status, body) =
        send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "(2+3)*4" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let expr_id = body["id"].as_i64().unwrap();

    let (_, add_task) = send(app.clone(), auth_get("/internal/task", &token)).await;
    assert_eq!(add_task["operation"], "+");
    let add_id = add_task["id"].as_str().unwrap().to_string();

    // Multiplication is not ready before the addition completes.
    let (status, _) = send(app.clone(), auth_get("/internal/task", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(
        app.clone(),
        auth_post("/internal/task/requeue", &token, json!({ "id": add_id, "result": 5.0, "status": "completed" })),
    )
    .await;

    let (status, mul_task) = send(app.clone(), auth_get("/internal/task", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mul_task["operation"], "*");
    let mul_id = mul_task["id"].as_str().unwrap().to_string();

    send(
        app.clone(),
        auth_post("/internal/task/requeue", &token, json!({ "id": mul_id, "result": 20.0, "status": "completed" })),
    )
    .await;

    let (_, expr) = send(app.clone(), auth_get(&format!("/api/v1/expressions/{expr_id}"), &token)).await;
    assert_eq!(expr["status"], "completed");
    assert_eq!(expr["result"], 20.0);
}

/// Scenario 4 (spec §8): literal `5/0` is rejected at compile time with
/// `division_by_zero`, and no expression is persisted.
#[tokio::test]
async fn literal_division_by_zero_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let token = register_and_login(&app, "carol").await;

    let (status, body) = send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "5/0" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("division by zero"));

    let (_, expressions) = send(app.clone(), auth_get("/api/v1/expressions", &token)).await;
    assert!(expressions.as_array().unwrap().is_empty());
}

/// Scenario 5 (spec §8): `2++3` is rejected with `invalid_syntax`.
#[tokio::test]
async fn doubled_operator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let token = register_and_login(&app, "dave").await;

    let (status, _) = send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "2++3" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

/// Cross-user access to an expression is `403`, and a nonexistent one is
/// `404` (spec §4.E).
#[tokio::test]
async fn expression_access_is_owner_scoped() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let alice = register_and_login(&app, "eve").await;
    let mallory = register_and_login(&app, "mallory").await;

    let (_, body) = send(app.clone(), auth_post("/api/v1/calculate", &alice, json!({ "expression": "1+1" }))).await;
    let expr_id = body["id"].as_i64().unwrap();

    let (status, _) = send(app.clone(), auth_get(&format!("/api/v1/expressions/{expr_id}"), &mallory)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(app.clone(), auth_get("/api/v1/expressions/999999", &alice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Missing/invalid bearer tokens are rejected before reaching a handler.
#[tokio::test]
async fn missing_auth_header_is_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;

    let req = Request::builder().method("GET").uri("/api/v1/expressions").body(Body::empty()).unwrap();
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Duplicate registration is a `409` (spec §6).
#[tokio::test]
async fn duplicate_registration_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;

    register_and_login(&app, "frank").await;
    let (status, _) =
        send(app.clone(), json_post("/api/v1/register", json!({ "login": "frank", "password": "whatever" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

/// Recovery scenario (spec §8): submit `(1+2)*(3+4)`, complete one
/// addition, then rebuild the store from the same file (simulating a
/// restart) and confirm the remaining addition is still leasable and the
/// multiplication becomes ready once both complete.
#[tokio::test]
async fn recovery_restores_ready_queue_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("exprmesh.db");
    let db_path = db_path.to_str().unwrap();

    let expr_id;
    let left_add_id;
    {
        let app = test_app(db_path).await;
        let token = register_and_login(&app, "grace").await;

        let (_, body) =
            send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "(1+2)*(3+4)" }))).await;
        expr_id = body["id"].as_i64().unwrap();

        let (_, first_add) = send(app.clone(), auth_get("/internal/task", &token)).await;
        left_add_id = first_add["id"].as_str().unwrap().to_string();

        send(
            app.clone(),
            auth_post(
                "/internal/task/requeue",
                &token,
                json!({ "id": left_add_id, "result": 3.0, "status": "completed" }),
            ),
        )
        .await;
        // Process exits here without draining the second addition —
        // simulating a crash mid-expression.
    }

    // "Restart": a fresh SqliteStore opened against the same file, with
    // recovery run again as it would be at boot.
    let app = test_app(db_path).await;
    let token_header = {
        // Re-authenticate as the same user to exercise the authenticated
        // endpoints post-restart.
        let (_, login_body) =
            send(app.clone(), json_post("/api/v1/login", json!({ "login": "grace", "password": "hunter2" }))).await;
        login_body["token"].as_str().unwrap().to_string()
    };

    let (status, second_add) = send(app.clone(), auth_get("/internal/task", &token_header)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second_add["operation"], "+");
    assert_ne!(second_add["id"].as_str().unwrap(), left_add_id);
    let right_add_id = second_add["id"].as_str().unwrap().to_string();

    send(
        app.clone(),
        auth_post(
            "/internal/task/requeue",
            &token_header,
            json!({ "id": right_add_id, "result": 7.0, "status": "completed" }),
        ),
    )
    .await;

    let (status, mul_task) = send(app.clone(), auth_get("/internal/task", &token_header)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mul_task["operation"], "*");
    let mul_id = mul_task["id"].as_str().unwrap().to_string();

    send(
        app.clone(),
        auth_post("/internal/task/requeue", &token_header, json!({ "id": mul_id, "result": 21.0, "status": "completed" })),
    )
    .await;

    let (_, expr) = send(app.clone(), auth_get(&format!("/api/v1/expressions/{expr_id}"), &token_header)).await;
    assert_eq!(expr["status"], "completed");
    assert_eq!(expr["result"], 21.0);
}

/// A worker reporting `status=error` at runtime (e.g. a computed division
/// by zero it detected itself) fails the whole expression (spec §7, §9).
#[tokio::test]
async fn worker_reported_error_fails_the_expression() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("exprmesh.db");
    let app = test_app(db.to_str().unwrap()).await;
    let token = register_and_login(&app, "heidi").await;

    let (_, body) = send(app.clone(), auth_post("/api/v1/calculate", &token, json!({ "expression": "1+2" }))).await;
    let expr_id = body["id"].as_i64().unwrap();

    let (_, task) = send(app.clone(), auth_get("/internal/task", &token)).await;
    let task_id = task["id"].as_str().unwrap().to_string();

    send(
        app.clone(),
        auth_post("/internal/task/requeue", &token, json!({ "id": task_id, "status": "error" })),
    )
    .await;

    let (_, expr) = send(app.clone(), auth_get(&format!("/api/v1/expressions/{expr_id}"), &token)).await;
    assert_eq!(expr["status"], "error");
}
