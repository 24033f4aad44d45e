//! Agent session port - interface to the vendor app-server process.
//!
//! The agent runtime is a black box: the core may start a thread, submit a
//! turn, await its terminal notification, and stop the process. It must
//! never assume it can cancel or interrupt a submitted turn.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Sandbox/approval policy attached to a thread or turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    /// Workspace-scoped writes, no network
    #[default]
    WorkspaceWrite,
    /// Read-only access, used for review turns
    ReadOnly,
}

/// Opaque handle correlating a submitted turn with its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnHandle(pub Uuid);

/// Terminal status of an agent turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    Error,
    Timeout,
}

/// Outcome of one agent invocation. Transient; consumed immediately by
/// whichever loop submitted the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub status: TurnStatus,
    /// Final agent message, when the runtime reported one
    pub message: Option<String>,
    /// Error message for `Error`/`Timeout` outcomes
    pub error: Option<String>,
}

impl TurnResult {
    pub fn ok(message: Option<String>) -> Self {
        Self {
            status: TurnStatus::Ok,
            message,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: TurnStatus::Error,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: TurnStatus::Timeout,
            message: None,
            error: Some("turn did not complete within the timeout".to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TurnStatus::Ok
    }
}

/// Port for the long-lived conversational agent session.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Start a conversational thread rooted at the given working directory.
    async fn start_thread(&self, workdir: &Path, policy: SandboxPolicy) -> DomainResult<Uuid>;

    /// Submit a turn with the given input text.
    async fn submit_turn(&self, thread_id: Uuid, prompt: &str) -> DomainResult<TurnHandle>;

    /// Await the terminal notification for a submitted turn, correlated by
    /// thread+turn id. A turn that never completes within the timeout is a
    /// `Timeout` result, not a hang and not an `Err`.
    async fn await_completion(
        &self,
        thread_id: Uuid,
        handle: TurnHandle,
        timeout: Duration,
    ) -> DomainResult<TurnResult>;

    /// Stop the thread and release its resources.
    async fn stop(&self, thread_id: Uuid) -> DomainResult<()>;
}
