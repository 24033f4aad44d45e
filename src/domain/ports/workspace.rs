//! Workspace gateway port - isolated checkouts and git plumbing.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Output of an allow-listed command run inside a task workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the process was forcibly terminated at the timeout
    pub killed: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.killed
    }
}

/// Port for workspace materialization and git operations.
///
/// Implementations own clone/branch mechanics; the core only needs an
/// isolated directory per task and a way to run allow-listed commands in it.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Provision an isolated checkout for the task on the given branch.
    async fn provision(&self, task_id: Uuid, branch: &str) -> DomainResult<PathBuf>;

    /// Run an allow-listed command inside the task workspace.
    async fn run(&self, task_id: Uuid, argv: &[String]) -> DomainResult<CommandOutput>;

    /// Paths changed relative to the task's base branch.
    async fn changed_files(&self, task_id: Uuid) -> DomainResult<Vec<String>>;

    /// The full textual diff relative to the task's base branch.
    async fn diff(&self, task_id: Uuid) -> DomainResult<String>;

    /// A stable string representative of the current diff, used as a
    /// stagnation fingerprint by the fix loop.
    async fn diff_fingerprint(&self, task_id: Uuid) -> DomainResult<String>;

    /// Commit all accumulated changes as one commit; returns the hash.
    async fn commit_all(&self, task_id: Uuid, message: &str) -> DomainResult<String>;

    /// Push the task branch to the remote.
    async fn push(&self, task_id: Uuid) -> DomainResult<()>;

    /// Open a pull request for the task branch; returns the PR URL.
    async fn open_pull_request(
        &self,
        task_id: Uuid,
        title: &str,
        body: &str,
    ) -> DomainResult<String>;
}
