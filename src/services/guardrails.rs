//! Guardrail enforcement on changed files.
//!
//! After every agent turn the changed-file set is intersected with a small
//! protected set. Any hit fails the task immediately: the check is hard and
//! synchronous, never retried and never advisory.

use std::sync::Arc;

use tracing::{error, instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{GuardrailConfig, TaskFailure};
use crate::domain::ports::Workspace;
use crate::services::task_registry::TaskRegistry;

/// Enforces the protected-path guardrail after agent turns.
pub struct GuardrailEnforcer {
    registry: Arc<TaskRegistry>,
    workspace: Arc<dyn Workspace>,
    config: GuardrailConfig,
}

impl GuardrailEnforcer {
    pub fn new(
        registry: Arc<TaskRegistry>,
        workspace: Arc<dyn Workspace>,
        config: GuardrailConfig,
    ) -> Self {
        Self {
            registry,
            workspace,
            config,
        }
    }

    /// Check the task's changed files against the protected set. On a
    /// violation the task is transitioned to failed (with a guardrail
    /// failure record, which recovery paths refuse to clear) and a
    /// `GuardrailViolation` error is raised listing the offending paths.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn enforce(&self, task_id: Uuid) -> DomainResult<()> {
        let changed = self.workspace.changed_files(task_id).await?;
        let offending: Vec<String> = changed
            .into_iter()
            .filter(|path| self.is_protected(path))
            .collect();

        if offending.is_empty() {
            return Ok(());
        }

        error!(
            task_id = %task_id,
            paths = ?offending,
            "Protected paths edited by agent turn"
        );

        self.registry
            .fail(
                task_id,
                TaskFailure::guardrail(format!(
                    "protected paths edited: {}",
                    offending.join(", ")
                )),
            )
            .await?;

        Err(DomainError::GuardrailViolation {
            task_id,
            paths: offending,
        })
    }

    /// A path is protected when it matches a protected entry exactly or is
    /// that entry at the repository root (the set is small and fixed, so
    /// exact matching is enough).
    fn is_protected(&self, path: &str) -> bool {
        let normalized = path.trim_start_matches("./");
        self.config
            .protected_paths
            .iter()
            .any(|p| normalized == p.trim_start_matches("./"))
    }
}
