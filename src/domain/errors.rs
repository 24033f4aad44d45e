//! Domain errors for the drover control plane.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur while driving an agent run.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Branch name already in use: {0}")]
    DuplicateBranch(String),

    #[error("Guardrail violation on task {task_id}: protected paths edited: {}", .paths.join(", "))]
    GuardrailViolation { task_id: Uuid, paths: Vec<String> },

    #[error("Turn budget exhausted for task {task_id}: {used}/{budget} turns consumed")]
    TurnBudgetExhausted { task_id: Uuid, used: u32, budget: u32 },

    #[error("Agent session error: {0}")]
    AgentSession(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}
