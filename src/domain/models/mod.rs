//! Domain models.

pub mod config;
pub mod memory;
pub mod quality;
pub mod review;
pub mod run;
pub mod task;
pub mod verify;

pub use config::{
    AgentConfig, Config, FixLoopConfig, GuardrailConfig, LoggingConfig, OrchestratorConfig,
    QualityCheckConfig, QualityConfig, ReviewConfig, StorageConfig, VerifyConfig, WorkspaceConfig,
};
pub use memory::LearningRecord;
pub use quality::{
    CheckOutcome, DimensionScore, QualityDimension, QualityScore, NEUTRAL_SCORE,
};
pub use review::{FindingSeverity, ReviewFinding, ReviewLoopResult, ReviewReport};
pub use run::{
    AutonomousRun, Checkpoint, ExecutionPlan, Phase, PhaseKind, PhaseStatus, RunFailure, RunStatus,
};
pub use task::{Task, TaskFailure, TaskStatus};
pub use verify::{FailureCategory, FixAbortReason, FixLoopResult, VerifyFailure, VerifyResult};
