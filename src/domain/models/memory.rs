//! Learning records extracted from fix iterations.
//!
//! Every repair iteration yields a record, whether or not it fixed the
//! failure; failed attempts are still useful signal for later prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One error-signature/fix pairing captured from a fix iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub task_id: Uuid,
    /// Compact signature of the failures the iteration was fixing
    pub error_signature: String,
    /// Diff fingerprint after the fix attempt
    pub fingerprint: String,
    /// Fix-loop iteration that produced the record (1-based)
    pub iteration: u32,
    /// Whether the subsequent verification passed
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(
        task_id: Uuid,
        error_signature: impl Into<String>,
        fingerprint: impl Into<String>,
        iteration: u32,
        succeeded: bool,
    ) -> Self {
        Self {
            task_id,
            error_signature: error_signature.into(),
            fingerprint: fingerprint.into(),
            iteration,
            succeeded,
            at: Utc::now(),
        }
    }
}
