//! Router wiring and shared application state.
//!
//! Grounded on the teacher's `api/routes.rs`: an `AppState` bundling
//! everything handlers need, a `serve(config)` entry point that builds the
//! `Router` with `TraceLayer`/`CorsLayer`, and `axum::serve` against a
//! `TcpListener`.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::store::{SqliteStore, Store};

use super::handlers::{auth, expressions, tasks};
use super::middleware::require_auth;

/// Shared application state, cheaply `Clone`-able (all fields are `Arc` or
/// already cheap to copy) so axum can hand it to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
}

fn unauthenticated_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/register", post(auth::register))
        .route("/api/v1/login", post(auth::login))
}

fn authenticated_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/calculate", post(expressions::calculate))
        .route("/api/v1/expressions", get(expressions::list_expressions))
        .route("/api/v1/expressions/:id", get(expressions::get_expression))
        .route("/internal/task", get(tasks::lease_task))
        .route("/internal/task/:id", get(tasks::get_task))
        .route("/internal/task/requeue", post(tasks::requeue))
        .route_layer(axum_middleware::from_fn_with_state(state, require_auth))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(unauthenticated_router())
        .merge(authenticated_router(state.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server: open the store, run Recovery (spec §4.F), bind,
/// and serve until the process is killed.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = SqliteStore::new(&config.db_conn_str).await?;
    let store: Arc<dyn Store> = Arc::new(store);

    let restored = crate::scheduler::recover(store.as_ref()).await?;
    tracing::info!(restored, "recovery complete");

    let state = AppState { store, config: config.clone() };
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
