//! Ports - interfaces to external collaborators.

pub mod agent_session;
pub mod quality_check;
pub mod reviewer;
pub mod workspace;

pub use agent_session::{AgentSession, SandboxPolicy, TurnHandle, TurnResult, TurnStatus};
pub use quality_check::QualityCheck;
pub use reviewer::Reviewer;
pub use workspace::{CommandOutput, Workspace};
