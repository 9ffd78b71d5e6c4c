//! Configuration for the expression scheduler.
//!
//! Configuration is set via environment variables:
//! - `DB_CONN_STR` - Optional. SQLite database path. Defaults to `exprmesh.db`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `JWT_SECRET` - Optional. HMAC-SHA256 signing secret. Defaults to a
//!   development-only constant; set explicitly in production.
//! - `JWT_TTL_HOURS` - Optional. Token lifetime in hours. Defaults to `24`.
//! - `TIME_ADDITION_MS` / `TIME_SUBTRACTION_MS` / `TIME_MULTIPLICATION_MS` /
//!   `TIME_DIVISION_MS` - Optional. Simulated per-operator cost in
//!   milliseconds, applied by the worker before submitting a result.
//! - `COMPUTING_POWER` - Optional. Number of concurrent polling loops an
//!   agent process runs. Defaults to `4`.
//! - `AGENT_BASE_URL` - Optional (agent binary only). Base URL of the
//!   orchestrator's HTTP API. Defaults to `http://127.0.0.1:8080`.
//! - `AGENT_POLL_INTERVAL_MS` - Optional (agent binary only). Delay between
//!   empty-queue poll attempts. Defaults to `500`.
//! - `AGENT_TOKEN` - Required (agent binary only, when auth is enforced).
//!   Bearer token the agent presents to `/internal/task*`.
//! - `LEASE_VISIBILITY_TIMEOUT_MS` - Optional. See [`Config::lease_visibility_timeout_ms`].

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Per-operator simulated execution cost, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct OperationTimings {
    pub addition_ms: u64,
    pub subtraction_ms: u64,
    pub multiplication_ms: u64,
    pub division_ms: u64,
}

impl Default for OperationTimings {
    fn default() -> Self {
        Self {
            addition_ms: 1000,
            subtraction_ms: 1000,
            multiplication_ms: 2000,
            division_ms: 2000,
        }
    }
}

impl OperationTimings {
    pub fn for_op(&self, op: crate::model::Operator) -> u64 {
        use crate::model::Operator::*;
        match op {
            Add => self.addition_ms,
            Sub => self.subtraction_ms,
            Mul => self.multiplication_ms,
            Div => self.division_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path (spec.md's `DB_CONN_STR`).
    pub db_conn_str: String,

    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// HMAC-SHA256 secret used to sign and verify JWTs.
    pub jwt_secret: String,

    /// JWT lifetime in hours.
    pub jwt_ttl_hours: i64,

    /// Per-operator simulated costs.
    pub timings: OperationTimings,

    /// Concurrent polling loops per agent process.
    pub computing_power: usize,

    /// Known gap (spec §9): there is no lease visibility timeout, so a
    /// worker that crashes mid-lease leaves its task stuck in-flight
    /// forever. This option exists so the gap is a documented, surfaced
    /// knob rather than a silent limitation; a non-zero value here is not
    /// currently enforced by the scheduler (see DESIGN.md).
    pub lease_visibility_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_conn_str =
            std::env::var("DB_CONN_STR").unwrap_or_else(|_| "exprmesh.db".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{e}")))?;

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "dev-only-insecure-secret-change-me".to_string());

        let jwt_ttl_hours = std::env::var("JWT_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("JWT_TTL_HOURS".to_string(), format!("{e}")))?;

        let timings = OperationTimings {
            addition_ms: parse_env_or("TIME_ADDITION_MS", 1000)?,
            subtraction_ms: parse_env_or("TIME_SUBTRACTION_MS", 1000)?,
            multiplication_ms: parse_env_or("TIME_MULTIPLICATION_MS", 2000)?,
            division_ms: parse_env_or("TIME_DIVISION_MS", 2000)?,
        };

        let computing_power = parse_env_or("COMPUTING_POWER", 4usize)?;

        let lease_visibility_timeout_ms = match std::env::var("LEASE_VISIBILITY_TIMEOUT_MS") {
            Ok(v) => Some(v.parse().map_err(|e| {
                ConfigError::InvalidValue("LEASE_VISIBILITY_TIMEOUT_MS".to_string(), format!("{e}"))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            db_conn_str,
            host,
            port,
            jwt_secret,
            jwt_ttl_hours,
            timings,
            computing_power,
            lease_visibility_timeout_ms,
        })
    }

    /// Config with sane defaults, useful for tests.
    pub fn for_tests(db_conn_str: impl Into<String>) -> Self {
        Self {
            db_conn_str: db_conn_str.into(),
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_hours: 24,
            timings: OperationTimings::default(),
            computing_power: 1,
            lease_visibility_timeout_ms: None,
        }
    }

}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Agent-side configuration (the worker/agent binary, §4.G).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: String,
    pub poll_interval: Duration,
    pub computing_power: usize,
    pub bearer_token: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("AGENT_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let poll_interval_ms: u64 = parse_env_or("AGENT_POLL_INTERVAL_MS", 500u64)?;
        let computing_power = parse_env_or("COMPUTING_POWER", 4usize)?;
        let bearer_token = std::env::var("AGENT_TOKEN").ok();

        Ok(Self {
            base_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            computing_power,
            bearer_token,
        })
    }
}
