//! Agent-backed reviewer.
//!
//! Runs the review as one agent turn on a dedicated read-only thread rooted
//! at the task workspace. The agent is asked to answer with a JSON array of
//! findings; the array is extracted from the final message so surrounding
//! prose does not break parsing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FindingSeverity, ReviewFinding, ReviewReport};
use crate::domain::ports::{AgentSession, Reviewer, SandboxPolicy};
use crate::services::task_registry::TaskRegistry;

/// Reviewer implemented as a read-only agent turn over the diff.
pub struct AgentReviewer {
    agent: Arc<dyn AgentSession>,
    registry: Arc<TaskRegistry>,
    turn_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    severity: String,
    #[serde(default)]
    file: Option<String>,
    message: String,
}

impl AgentReviewer {
    pub fn new(
        agent: Arc<dyn AgentSession>,
        registry: Arc<TaskRegistry>,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            agent,
            registry,
            turn_timeout,
        }
    }
}

#[async_trait]
impl Reviewer for AgentReviewer {
    #[instrument(skip(self, diff), fields(task_id = %task_id))]
    async fn review(&self, task_id: Uuid, diff: &str) -> DomainResult<ReviewReport> {
        let task = self
            .registry
            .get(task_id)
            .await
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let workdir = task.workspace_path.ok_or_else(|| {
            DomainError::ValidationFailed(format!("task {task_id} has no workspace"))
        })?;

        let thread_id = self
            .agent
            .start_thread(Path::new(&workdir), SandboxPolicy::ReadOnly)
            .await?;
        let prompt = review_prompt(diff);

        let outcome = async {
            let handle = self.agent.submit_turn(thread_id, &prompt).await?;
            self.agent
                .await_completion(thread_id, handle, self.turn_timeout)
                .await
        }
        .await;
        // Review threads are one-shot; tear down regardless of outcome.
        let _ = self.agent.stop(thread_id).await;

        let turn = outcome?;
        if !turn.is_ok() {
            return Err(DomainError::AgentSession(
                turn.error
                    .unwrap_or_else(|| "review turn failed".to_string()),
            ));
        }
        let message = turn
            .message
            .ok_or_else(|| DomainError::AgentSession("review turn had no output".to_string()))?;
        let report = parse_report(&message)?;
        debug!(task_id = %task_id, findings = report.findings.len(), "Review parsed");
        Ok(report)
    }
}

fn review_prompt(diff: &str) -> String {
    format!(
        "Review the following diff for correctness, safety, and test coverage.\n\
         Answer with ONLY a JSON array of findings; an empty array means the\n\
         diff is acceptable. Each finding is an object with:\n\
         - \"severity\": \"error\" | \"warning\" | \"suggestion\"\n\
         - \"file\": the path the finding refers to, or null\n\
         - \"message\": a short description\n\
         Use \"error\" only for problems that must block merging.\n\n\
         ```diff\n{diff}\n```"
    )
}

/// Extract the findings array from the agent's message, tolerating prose
/// or code fences around the JSON.
fn parse_report(message: &str) -> DomainResult<ReviewReport> {
    let start = message.find('[').ok_or_else(|| {
        DomainError::AgentSession("review output contains no JSON array".to_string())
    })?;
    let end = message.rfind(']').ok_or_else(|| {
        DomainError::AgentSession("review output contains no JSON array".to_string())
    })?;
    if end < start {
        return Err(DomainError::AgentSession(
            "review output contains no JSON array".to_string(),
        ));
    }

    let raw: Vec<RawFinding> = serde_json::from_str(&message[start..=end])?;
    let findings = raw
        .into_iter()
        .map(|f| {
            let severity = match f.severity.as_str() {
                "error" => FindingSeverity::Error,
                "warning" => FindingSeverity::Warning,
                // Unknown severities are surfaced, never escalated.
                _ => FindingSeverity::Suggestion,
            };
            ReviewFinding {
                severity,
                file: f.file,
                message: f.message,
            }
        })
        .collect();
    Ok(ReviewReport { findings })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_array() {
        let report = parse_report(
            r#"[{"severity": "error", "file": "src/a.ts", "message": "unchecked input"}]"#,
        )
        .unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, FindingSeverity::Error);
        assert!(!report.approved());
    }

    #[test]
    fn test_parses_array_wrapped_in_prose_and_fences() {
        let message = "Here is my review:\n```json\n[\n  {\"severity\": \"warning\", \"file\": null, \"message\": \"long function\"}\n]\n```\nOverall fine.";
        let report = parse_report(message).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert!(report.approved());
    }

    #[test]
    fn test_empty_array_is_approval() {
        let report = parse_report("[]").unwrap();
        assert!(report.approved());
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_unknown_severity_downgrades_to_suggestion() {
        let report = parse_report(
            r#"[{"severity": "catastrophic", "message": "the sky is falling"}]"#,
        )
        .unwrap();
        assert_eq!(report.findings[0].severity, FindingSeverity::Suggestion);
        assert!(report.approved());
    }

    #[test]
    fn test_output_without_array_is_an_error() {
        assert!(parse_report("looks good to me!").is_err());
    }
}
