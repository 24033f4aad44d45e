//! Task registry - owns the task state machine.
//!
//! All task mutations flow through the registry: it enforces the fixed
//! transition graph, keeps branch names unique for its whole lifetime, and
//! persists the full task set on every mutation via the atomic snapshot
//! store. The map write lock is held across the snapshot write so the
//! on-disk order always matches the mutation order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskFailure, TaskStatus};
use crate::infrastructure::storage::StateStore;

const SNAPSHOT: &str = "tasks";

/// Registry owning task lifecycle state.
pub struct TaskRegistry {
    store: Arc<StateStore>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    /// Default lifetime turn budget for new tasks.
    turn_budget: u32,
}

impl TaskRegistry {
    /// Create a registry, restoring any previously persisted task set.
    pub async fn load(store: Arc<StateStore>, turn_budget: u32) -> DomainResult<Self> {
        let tasks: HashMap<Uuid, Task> = store.load(SNAPSHOT).await?.unwrap_or_default();
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Restored task registry from snapshot");
        }
        Ok(Self {
            store,
            tasks: RwLock::new(tasks),
            turn_budget,
        })
    }

    /// Create a new task. Fails with `DuplicateBranch` if the branch name
    /// was ever used by another task, regardless of that task's status.
    pub async fn create_task(&self, id: Option<Uuid>, branch: &str) -> DomainResult<Task> {
        let mut tasks = self.tasks.write().await;

        if tasks.values().any(|t| t.branch == branch) {
            return Err(DomainError::DuplicateBranch(branch.to_string()));
        }

        let task = Task::new(id.unwrap_or_else(Uuid::new_v4), branch, self.turn_budget);
        task.validate().map_err(DomainError::ValidationFailed)?;
        if tasks.contains_key(&task.id) {
            return Err(DomainError::ValidationFailed(format!(
                "task id {} already exists",
                task.id
            )));
        }

        tasks.insert(task.id, task.clone());
        self.store.save(SNAPSHOT, &*tasks).await?;

        info!(task_id = %task.id, branch = %task.branch, "Task created");
        Ok(task)
    }

    /// Look up a task. Structured not-found: polling reads never error.
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut all: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Transition a task to a new status, enforcing the transition graph.
    pub async fn transition(&self, id: Uuid, new_status: TaskStatus) -> DomainResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;

        if !task.can_transition_to(new_status) {
            warn!(
                task_id = %id,
                from = %task.status,
                to = %new_status,
                "Rejected invalid transition"
            );
            return Err(DomainError::InvalidTransition {
                from: task.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        task.apply_transition(new_status);
        let updated = task.clone();
        self.store.save(SNAPSHOT, &*tasks).await?;

        info!(task_id = %id, status = %new_status, "Task transitioned");
        Ok(updated)
    }

    /// Fail a task with a reason, recording whether a guardrail caused it.
    pub async fn fail(&self, id: Uuid, failure: TaskFailure) -> DomainResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;

        if task.status != TaskStatus::Failed {
            if !task.can_transition_to(TaskStatus::Failed) {
                return Err(DomainError::InvalidTransition {
                    from: task.status.as_str().to_string(),
                    to: TaskStatus::Failed.as_str().to_string(),
                });
            }
            task.apply_transition(TaskStatus::Failed);
        }
        task.failure = Some(failure.clone());
        task.touch();
        let updated = task.clone();
        self.store.save(SNAPSHOT, &*tasks).await?;

        warn!(task_id = %id, guardrail = failure.guardrail, reason = %failure.reason, "Task failed");
        Ok(updated)
    }

    /// Account one agent turn against the task's lifetime budget.
    /// Exceeding the budget is a fatal error, never a silent truncation.
    pub async fn note_turn(&self, id: Uuid) -> DomainResult<u32> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;

        if task.turns_used >= task.turn_budget {
            return Err(DomainError::TurnBudgetExhausted {
                task_id: id,
                used: task.turns_used,
                budget: task.turn_budget,
            });
        }

        task.turns_used += 1;
        task.touch();
        let used = task.turns_used;
        self.store.save(SNAPSHOT, &*tasks).await?;
        Ok(used)
    }

    /// Record the provisioned workspace path.
    pub async fn set_workspace(&self, id: Uuid, path: &str) -> DomainResult<Task> {
        self.update(id, |task| task.workspace_path = Some(path.to_string()))
            .await
    }

    /// Record the agent thread driving the task.
    pub async fn set_thread(&self, id: Uuid, thread_id: Uuid) -> DomainResult<Task> {
        self.update(id, |task| task.thread_id = Some(thread_id)).await
    }

    async fn update(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut Task) + Send,
    ) -> DomainResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;
        mutate(task);
        task.touch();
        let updated = task.clone();
        self.store.save(SNAPSHOT, &*tasks).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    async fn registry(dir: &TempDir) -> TaskRegistry {
        let store = Arc::new(StateStore::new(dir.path()));
        TaskRegistry::load(store, 40).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_allocates_created_status() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        let task = reg.create_task(None, "drover/feature-a").await.unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.branch, "drover/feature-a");
    }

    #[tokio::test]
    async fn test_duplicate_branch_rejected_regardless_of_status() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        let first = reg.create_task(None, "drover/same").await.unwrap();

        // Drive the first task to the terminal state; the branch name must
        // still be unusable.
        for s in [
            TaskStatus::Mutating,
            TaskStatus::Verifying,
            TaskStatus::Ready,
            TaskStatus::PrOpened,
        ] {
            reg.transition(first.id, s).await.unwrap();
        }

        let err = reg.create_task(None, "drover/same").await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicateBranch(b) if b == "drover/same"));
    }

    #[tokio::test]
    async fn test_only_table_transitions_succeed() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        let task = reg.create_task(None, "drover/t").await.unwrap();

        let err = reg.transition(task.id, TaskStatus::Ready).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        reg.transition(task.id, TaskStatus::Mutating).await.unwrap();
        reg.transition(task.id, TaskStatus::Verifying).await.unwrap();
        let updated = reg.transition(task.id, TaskStatus::Fixing).await.unwrap();
        assert_eq!(updated.status, TaskStatus::Fixing);
    }

    #[tokio::test]
    async fn test_failed_recovery_paths() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        let task = reg.create_task(None, "drover/recover").await.unwrap();

        reg.fail(task.id, TaskFailure::new("phase blew up")).await.unwrap();
        let recovered = reg.transition(task.id, TaskStatus::Mutating).await.unwrap();
        assert_eq!(recovered.status, TaskStatus::Mutating);
        assert!(recovered.failure.is_none());
    }

    #[tokio::test]
    async fn test_turn_budget_is_fatal_when_exceeded() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let reg = TaskRegistry::load(store, 2).await.unwrap();
        let task = reg.create_task(None, "drover/budget").await.unwrap();

        assert_eq!(reg.note_turn(task.id).await.unwrap(), 1);
        assert_eq!(reg.note_turn(task.id).await.unwrap(), 2);
        let err = reg.note_turn(task.id).await.unwrap_err();
        assert!(matches!(err, DomainError::TurnBudgetExhausted { used: 2, budget: 2, .. }));
    }

    #[tokio::test]
    async fn test_get_is_structured_not_found() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        assert!(reg.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_polling_get_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir).await;
        let task = reg.create_task(None, "drover/poll").await.unwrap();

        let a = reg.get(task.id).await.unwrap();
        let b = reg.get(task.id).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_restart_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));

        let reg = TaskRegistry::load(Arc::clone(&store), 40).await.unwrap();
        let t1 = reg.create_task(None, "drover/one").await.unwrap();
        let t2 = reg.create_task(None, "drover/two").await.unwrap();
        reg.transition(t1.id, TaskStatus::Mutating).await.unwrap();
        drop(reg);

        // Simulated process restart.
        let reg2 = TaskRegistry::load(store, 40).await.unwrap();
        let r1 = reg2.get(t1.id).await.unwrap();
        let r2 = reg2.get(t2.id).await.unwrap();
        assert_eq!(r1.status, TaskStatus::Mutating);
        assert_eq!(r2.status, TaskStatus::Created);
        // Branch uniqueness survives the restart
        assert!(reg2.create_task(None, "drover/one").await.is_err());
    }

    proptest! {
        /// Every (from, to) pair outside the transition table is rejected
        /// and every pair inside it is accepted.
        #[test]
        fn prop_transition_table_is_exhaustive(from_idx in 0usize..7, to_idx in 0usize..7) {
            let all = [
                TaskStatus::Created,
                TaskStatus::Mutating,
                TaskStatus::Verifying,
                TaskStatus::Fixing,
                TaskStatus::Ready,
                TaskStatus::PrOpened,
                TaskStatus::Failed,
            ];
            let from = all[from_idx];
            let to = all[to_idx];
            let allowed = from.valid_transitions().contains(&to);
            prop_assert_eq!(from.can_transition_to(to), allowed);
            // Terminal status never has exits
            if from == TaskStatus::PrOpened {
                prop_assert!(!allowed);
            }
        }
    }
}
