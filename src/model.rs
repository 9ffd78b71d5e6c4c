//! Core entities: users, expressions, and tasks.
//!
//! Field names follow the wire shapes in spec §6 so handlers can `derive`
//! `Serialize`/`Deserialize` directly instead of hand-mapping.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionStatus {
    Pending,
    Completed,
    Error,
}

impl ExpressionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpressionStatus::Pending => "pending",
            ExpressionStatus::Completed => "completed",
            ExpressionStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ExpressionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExpressionStatus::Pending),
            "completed" => Ok(ExpressionStatus::Completed),
            "error" => Ok(ExpressionStatus::Error),
            other => anyhow::bail!("unknown expression status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    pub id: i64,
    pub user_id: i64,
    pub expression: String,
    pub status: ExpressionStatus,
    pub result: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            other => anyhow::bail!("unknown task status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => a / b,
        }
    }
}

impl std::str::FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Sub),
            "*" => Ok(Operator::Mul),
            "/" => Ok(Operator::Div),
            other => anyhow::bail!("unknown operator: {other}"),
        }
    }
}

/// A single binary operation, the unit of work leased to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub expression_id: i64,
    pub arg1: String,
    pub arg2: String,
    pub operation: Operator,
    #[serde(rename = "operation_time")]
    pub op_time_ms: u64,
    pub status: TaskStatus,
    pub result: Option<f64>,
    pub depends_on: Vec<Uuid>,
}
