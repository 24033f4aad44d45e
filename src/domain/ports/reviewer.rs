//! Reviewer port - structured review of a task's diff.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ReviewReport;

/// Generates a structured review of the task's current diff.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, task_id: Uuid, diff: &str) -> DomainResult<ReviewReport>;
}
