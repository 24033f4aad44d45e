//! Task domain model.
//!
//! A task is one tracked unit of work bound to one workspace checkout and
//! one agent conversation thread. Its status moves through a fixed
//! transition graph owned by the task registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in the change lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is registered but no agent turn has run yet
    #[default]
    Created,
    /// An agent turn is mutating the workspace
    Mutating,
    /// The verification command is running (or about to)
    Verifying,
    /// A repair turn is in flight after a failed verification
    Fixing,
    /// Verification is green; the task can be committed and a PR opened
    Ready,
    /// A pull request has been opened (terminal)
    PrOpened,
    /// The task failed; recoverable sink for multi-phase runs
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Mutating => "mutating",
            Self::Verifying => "verifying",
            Self::Fixing => "fixing",
            Self::Ready => "ready",
            Self::PrOpened => "pr_opened",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "mutating" => Some(Self::Mutating),
            "verifying" => Some(Self::Verifying),
            "fixing" => Some(Self::Fixing),
            "ready" => Some(Self::Ready),
            "pr_opened" => Some(Self::PrOpened),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PrOpened)
    }

    /// Valid transitions from this status.
    ///
    /// `Failed` can return to `Ready`, `Mutating` or `Created` so a
    /// multi-phase autonomous run can recover a task between phases after a
    /// transient failure. Narrower graphs rejected legitimate recoveries.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Created => vec![Self::Mutating, Self::Failed],
            Self::Mutating => vec![Self::Verifying, Self::Failed],
            Self::Verifying => vec![Self::Fixing, Self::Ready, Self::Failed],
            Self::Fixing => vec![Self::Verifying, Self::Ready, Self::Failed],
            Self::Ready => vec![Self::PrOpened, Self::Failed],
            Self::PrOpened => vec![],
            Self::Failed => vec![Self::Ready, Self::Mutating, Self::Created],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task entered `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Human-readable reason string.
    pub reason: String,
    /// Whether the failure was caused by a guardrail violation.
    /// Guardrail failures are never auto-recovered by the orchestrator.
    pub guardrail: bool,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl TaskFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            guardrail: false,
            at: Utc::now(),
        }
    }

    pub fn guardrail(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            guardrail: true,
            at: Utc::now(),
        }
    }
}

/// One tracked unit of work against a target-repository checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Branch name; unique for the lifetime of the registry
    pub branch: String,
    /// Workspace directory for this task, once provisioned
    pub workspace_path: Option<String>,
    /// Agent conversation thread driving this task
    pub thread_id: Option<Uuid>,
    /// Current status
    pub status: TaskStatus,
    /// Failure record, present while the task is in `Failed`
    pub failure: Option<TaskFailure>,
    /// Agent turns consumed across the task's whole lifetime
    pub turns_used: u32,
    /// Hard cap on lifetime agent turns
    pub turn_budget: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// Version, bumped on every mutation
    pub version: u64,
}

impl Task {
    /// Create a new task on the given branch.
    pub fn new(id: Uuid, branch: impl Into<String>, turn_budget: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            branch: branch.into(),
            workspace_path: None,
            thread_id: None,
            status: TaskStatus::default(),
            failure: None,
            turns_used: 0,
            turn_budget,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Set the workspace path.
    pub fn with_workspace(mut self, path: impl Into<String>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    /// Set the agent thread id.
    pub fn with_thread(mut self, thread_id: Uuid) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, clearing any failure record when
    /// leaving `Failed`.
    pub(crate) fn apply_transition(&mut self, new_status: TaskStatus) {
        if self.status == TaskStatus::Failed && new_status != TaskStatus::Failed {
            self.failure = None;
        }
        self.status = new_status;
        self.touch();
    }

    /// Bump updated_at and version after a mutation.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Check if the task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Remaining lifetime turn budget.
    pub fn turns_remaining(&self) -> u32 {
        self.turn_budget.saturating_sub(self.turns_used)
    }

    /// Validate task invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.branch.trim().is_empty() {
            return Err("Task branch cannot be empty".to_string());
        }
        if self.turn_budget == 0 {
            return Err("Task turn budget must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(Uuid::new_v4(), "drover/test-branch", 40)
    }

    #[test]
    fn test_default_status_is_created() {
        assert_eq!(task().status, TaskStatus::Created);
    }

    #[test]
    fn test_repair_cycle_transitions() {
        // created -> mutating -> verifying -> fixing -> verifying -> ready -> pr_opened
        let mut t = task();
        for next in [
            TaskStatus::Mutating,
            TaskStatus::Verifying,
            TaskStatus::Fixing,
            TaskStatus::Verifying,
            TaskStatus::Ready,
            TaskStatus::PrOpened,
        ] {
            assert!(t.can_transition_to(next), "{} -> {} rejected", t.status, next);
            t.apply_transition(next);
        }
        assert!(t.is_terminal());
    }

    #[test]
    fn test_failed_recovery_transitions() {
        for target in [TaskStatus::Ready, TaskStatus::Mutating, TaskStatus::Created] {
            let mut t = task();
            t.apply_transition(TaskStatus::Failed);
            t.failure = Some(TaskFailure::new("verify exhausted"));
            assert!(t.can_transition_to(target));
            t.apply_transition(target);
            assert!(t.failure.is_none(), "failure record must clear on recovery");
        }
    }

    #[test]
    fn test_terminal_state_has_no_exits() {
        assert!(TaskStatus::PrOpened.valid_transitions().is_empty());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Ready));
        assert!(!TaskStatus::Ready.can_transition_to(TaskStatus::Mutating));
        assert!(!TaskStatus::Mutating.can_transition_to(TaskStatus::PrOpened));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::PrOpened));
    }

    #[test]
    fn test_turn_accounting() {
        let mut t = task();
        assert_eq!(t.turns_remaining(), 40);
        t.turns_used = 39;
        assert_eq!(t.turns_remaining(), 1);
        t.turns_used = 45;
        assert_eq!(t.turns_remaining(), 0);
    }

    #[test]
    fn test_validation() {
        let t = Task::new(Uuid::new_v4(), "  ", 40);
        assert!(t.validate().is_err());
        let t = Task::new(Uuid::new_v4(), "drover/x", 0);
        assert!(t.validate().is_err());
        assert!(task().validate().is_ok());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Created,
            TaskStatus::Mutating,
            TaskStatus::Verifying,
            TaskStatus::Fixing,
            TaskStatus::Ready,
            TaskStatus::PrOpened,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }
}
