//! Quality check port.
//!
//! Checks are registered by name at startup and iterated by the quality
//! gate; adding a dimension means registering a new implementer, not
//! editing the aggregator.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CheckOutcome, QualityDimension};

/// One named quality sub-check.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    /// Registry name of the check.
    fn name(&self) -> &str;

    /// Dimension this check scores.
    fn dimension(&self) -> QualityDimension;

    /// Run the check against the task's workspace.
    async fn run(&self, task_id: Uuid) -> DomainResult<CheckOutcome>;
}
