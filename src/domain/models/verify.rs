//! Verification outcomes and fix-loop results.

use serde::{Deserialize, Serialize};

/// Category of a parsed verification failure.
///
/// Ordered by repair priority: compilation and type errors cascade into
/// downstream lint and test failures, so fixing them first collapses the
/// failure set fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Compile,
    Lint,
    Test,
    Other,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Other => "other",
        }
    }
}

/// One structured failure parsed out of the verification command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyFailure {
    /// File the failure points at, when parseable
    pub file: Option<String>,
    /// Failure message
    pub message: String,
    /// Repair-priority category
    pub category: FailureCategory,
}

impl VerifyFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            file: None,
            message: message.into(),
            category,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Outcome of running the verification command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Verification command exit code
    pub exit_code: i32,
    /// Parsed structured failures; empty when `success` is true
    pub failures: Vec<VerifyFailure>,
    /// Tail of the raw combined output, kept so the loop can still make
    /// progress when no failure was individually parseable
    pub raw_tail: String,
}

impl VerifyResult {
    /// A passing verification.
    pub fn passing() -> Self {
        Self {
            exit_code: 0,
            failures: Vec::new(),
            raw_tail: String::new(),
        }
    }

    /// Verification succeeded iff the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failures sorted by repair priority (compile first, then lint, then
    /// test, then uncategorized).
    pub fn prioritized_failures(&self) -> Vec<&VerifyFailure> {
        let mut sorted: Vec<&VerifyFailure> = self.failures.iter().collect();
        sorted.sort_by_key(|f| f.category);
        sorted
    }
}

/// Why a fix loop stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAbortReason {
    /// The diff fingerprint was identical for the configured number of
    /// consecutive iterations: the agent is not making forward progress.
    Stuck,
    /// `max_iterations` repair attempts were consumed.
    BudgetExhausted,
}

impl FixAbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stuck => "stuck",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Terminal outcome of a verify-fix loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixLoopResult {
    /// Whether verification ended green
    pub success: bool,
    /// Number of repair iterations consumed
    pub iterations: u32,
    /// The last verification result observed
    pub last_verify: VerifyResult,
    /// Abort reason when `success` is false
    pub abort: Option<FixAbortReason>,
}

impl FixLoopResult {
    pub fn succeeded(iterations: u32, last_verify: VerifyResult) -> Self {
        Self {
            success: true,
            iterations,
            last_verify,
            abort: None,
        }
    }

    pub fn aborted(reason: FixAbortReason, iterations: u32, last_verify: VerifyResult) -> Self {
        Self {
            success: false,
            iterations,
            last_verify,
            abort: Some(reason),
        }
    }
}
