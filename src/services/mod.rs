//! Service layer - the control loops and state machines.

pub mod fix_loop;
pub mod guardrails;
pub mod learning;
pub mod orchestrator;
pub mod quality_gate;
pub mod review_loop;
pub mod task_registry;
pub mod verifier;

pub use fix_loop::FixLoopService;
pub use guardrails::GuardrailEnforcer;
pub use learning::LearningLog;
pub use orchestrator::AutonomousOrchestrator;
pub use quality_gate::QualityGate;
pub use review_loop::ReviewLoopService;
pub use task_registry::TaskRegistry;
pub use verifier::Verifier;
