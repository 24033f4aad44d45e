//! Structured review findings and review-loop outcomes.

use serde::{Deserialize, Serialize};

/// Severity of a review finding. Only `Error` findings block approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Error,
    Warning,
    Suggestion,
}

impl FindingSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
        }
    }
}

/// One finding from a structured review of the current diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub severity: FindingSeverity,
    /// File the finding points at, when the reviewer names one
    #[serde(default)]
    pub file: Option<String>,
    pub message: String,
}

impl ReviewFinding {
    pub fn new(severity: FindingSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            message: message.into(),
        }
    }
}

/// A structured review of one task's diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewReport {
    pub findings: Vec<ReviewFinding>,
}

impl ReviewReport {
    /// Approval requires zero error-severity findings; warnings and
    /// suggestions never block.
    pub fn approved(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == FindingSeverity::Error)
    }

    /// The error-severity findings, used to build fix prompts.
    pub fn errors(&self) -> Vec<&ReviewFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == FindingSeverity::Error)
            .collect()
    }
}

/// Terminal outcome of a review loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLoopResult {
    /// Whether the final review round approved the diff
    pub approved: bool,
    /// Review rounds consumed (at least 1)
    pub rounds: u32,
    /// The final review report
    pub last_report: ReviewReport,
    /// True when the loop stopped because `max_rounds` was exhausted;
    /// exhaustion is reported, never treated as approval
    pub rounds_exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_ignores_warnings_and_suggestions() {
        let report = ReviewReport {
            findings: vec![
                ReviewFinding::new(FindingSeverity::Warning, "consider renaming"),
                ReviewFinding::new(FindingSeverity::Suggestion, "add a doc comment"),
            ],
        };
        assert!(report.approved());
    }

    #[test]
    fn test_single_error_blocks_approval() {
        let report = ReviewReport {
            findings: vec![
                ReviewFinding::new(FindingSeverity::Suggestion, "nit"),
                ReviewFinding::new(FindingSeverity::Error, "unchecked unwrap on user input"),
            ],
        };
        assert!(!report.approved());
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn test_empty_report_is_approved() {
        assert!(ReviewReport::default().approved());
    }
}
