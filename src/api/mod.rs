//! HTTP API for the expression scheduler.
//!
//! ## Endpoints (spec §6)
//!
//! - `POST /api/v1/register` — create a user
//! - `POST /api/v1/login` — exchange credentials for a JWT
//! - `POST /api/v1/calculate` — submit an expression
//! - `GET /api/v1/expressions` — list the caller's expressions
//! - `GET /api/v1/expressions/{id}` — fetch one expression
//! - `GET /internal/task` — lease the next ready task
//! - `GET /internal/task/{id}` — fetch a task's current record
//! - `POST /internal/task/requeue` — submit a task's result

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod types;

pub use routes::serve;
