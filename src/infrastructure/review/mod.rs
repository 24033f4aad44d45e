//! Reviewer implementations.

pub mod agent_reviewer;

pub use agent_reviewer::AgentReviewer;
