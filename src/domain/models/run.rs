//! Autonomous run, execution plan, and checkpoint models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::quality::QualityScore;

/// Kind of a phase in the fixed execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Analysis,
    Implementation,
    Testing,
    Verification,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Verification => "verification",
        }
    }

    /// The phase goal injected into the agent prompt.
    pub fn goal(&self) -> &'static str {
        match self {
            Self::Analysis => {
                "Analyze the objective against the current codebase. Identify the \
                 files to change, the approach to take, and any risks. Record your \
                 plan as comments or notes inside the workspace."
            }
            Self::Implementation => {
                "Implement the objective following the analysis. Make the code \
                 changes in the workspace; keep them minimal and focused."
            }
            Self::Testing => {
                "Add or update tests covering the implemented changes. Make sure \
                 new behavior is exercised and old behavior is not broken."
            }
            Self::Verification => {
                "Run through the change once more: tidy loose ends, fix remaining \
                 failures, and make sure the verification command passes."
            }
        }
    }
}

/// Status of a phase. Transitions are monotonic
/// (pending -> in_progress -> completed | failed) and never revert except
/// through the orchestrator's explicit recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One named step of the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    /// Fix iterations accumulated while stabilizing this phase
    pub fix_iterations: u32,
    /// Failure reason when the phase failed
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn new(kind: PhaseKind) -> Self {
        Self {
            kind,
            status: PhaseStatus::Pending,
            fix_iterations: 0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// An ordered sequence of phases executed strictly in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Task this plan belongs to
    pub task_id: Uuid,
    pub phases: Vec<Phase>,
}

impl ExecutionPlan {
    /// The fixed default 4-phase plan.
    pub fn standard(task_id: Uuid) -> Self {
        Self {
            task_id,
            phases: vec![
                Phase::new(PhaseKind::Analysis),
                Phase::new(PhaseKind::Implementation),
                Phase::new(PhaseKind::Testing),
                Phase::new(PhaseKind::Verification),
            ],
        }
    }

    pub fn completed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Failed)
            .count()
    }
}

/// Status of an autonomous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planning,
    Executing,
    Validating,
    Committing,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Validating => "validating",
            Self::Committing => "committing",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why an autonomous run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Index of the phase at which the run stopped, when phase-bound
    pub phase_index: Option<usize>,
    /// Name of that phase
    pub phase_name: Option<String>,
    /// Human-readable reason
    pub reason: String,
}

impl RunFailure {
    pub fn at_phase(index: usize, name: &str, reason: impl Into<String>) -> Self {
        Self {
            phase_index: Some(index),
            phase_name: Some(name.to_string()),
            reason: reason.into(),
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            phase_index: None,
            phase_name: None,
            reason: reason.into(),
        }
    }
}

/// Top-level record binding one objective to one task and one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousRun {
    pub id: Uuid,
    pub objective: String,
    pub task_id: Uuid,
    pub status: RunStatus,
    pub quality: Option<QualityScore>,
    pub commit: Option<String>,
    pub pr_url: Option<String>,
    pub review_approved: Option<bool>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutonomousRun {
    pub fn new(objective: impl Into<String>, task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            objective: objective.into(),
            task_id,
            status: RunStatus::Planning,
            quality: None,
            commit: None,
            pr_url: None,
            review_approved: None,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// A saved point-in-time reference enabling resumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: Uuid,
    pub thread_id: Option<Uuid>,
    /// What had been accomplished when the checkpoint was taken
    pub description: String,
    pub at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(task_id: Uuid, thread_id: Option<Uuid>, description: impl Into<String>) -> Self {
        Self {
            task_id,
            thread_id,
            description: description.into(),
            at: Utc::now(),
        }
    }
}
