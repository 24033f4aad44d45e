//! Command-backed quality check.
//!
//! Wraps one configured command as a quality check: the exit code supplies
//! the pass flag, and when the last stdout line is a bare number in 0-100
//! it is taken as the dimension score. Otherwise passing scores 100 and
//! failing scores 0.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CheckOutcome, QualityCheckConfig, QualityDimension};
use crate::domain::ports::{QualityCheck, Workspace};

/// Quality check that runs an allow-listed command in the task workspace.
pub struct CommandQualityCheck {
    config: QualityCheckConfig,
    workspace: Arc<dyn Workspace>,
}

impl CommandQualityCheck {
    pub fn new(config: QualityCheckConfig, workspace: Arc<dyn Workspace>) -> Self {
        Self { config, workspace }
    }
}

#[async_trait]
impl QualityCheck for CommandQualityCheck {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dimension(&self) -> QualityDimension {
        self.config.dimension
    }

    async fn run(&self, task_id: Uuid) -> DomainResult<CheckOutcome> {
        let output = self.workspace.run(task_id, &self.config.command).await?;
        let passed = output.success();
        let score = parse_score(&output.stdout)
            .unwrap_or(if passed { 100.0 } else { 0.0 })
            .clamp(0.0, 100.0);
        debug!(
            task_id = %task_id,
            check = %self.config.name,
            passed,
            score,
            "Quality check finished"
        );
        Ok(CheckOutcome {
            passed,
            score,
            detail: json!({
                "exit_code": output.exit_code,
                "killed": output.killed,
            }),
        })
    }
}

fn parse_score(stdout: &str) -> Option<f64> {
    let last = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let value: f64 = last.trim().parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use std::path::PathBuf;

    struct OneShotWorkspace {
        output: CommandOutput,
    }

    #[async_trait]
    impl Workspace for OneShotWorkspace {
        async fn provision(&self, _: Uuid, _: &str) -> DomainResult<PathBuf> {
            Ok(PathBuf::from("/tmp/ws"))
        }
        async fn run(&self, _: Uuid, _: &[String]) -> DomainResult<CommandOutput> {
            Ok(self.output.clone())
        }
        async fn changed_files(&self, _: Uuid) -> DomainResult<Vec<String>> {
            Ok(vec![])
        }
        async fn diff(&self, _: Uuid) -> DomainResult<String> {
            Ok(String::new())
        }
        async fn diff_fingerprint(&self, _: Uuid) -> DomainResult<String> {
            Ok(String::new())
        }
        async fn commit_all(&self, _: Uuid, _: &str) -> DomainResult<String> {
            Ok("abc".into())
        }
        async fn push(&self, _: Uuid) -> DomainResult<()> {
            Ok(())
        }
        async fn open_pull_request(&self, _: Uuid, _: &str, _: &str) -> DomainResult<String> {
            Ok("https://example.test/pr/1".into())
        }
    }

    fn check_with(exit_code: i32, stdout: &str) -> CommandQualityCheck {
        CommandQualityCheck::new(
            QualityCheckConfig {
                name: "lint-run".to_string(),
                dimension: QualityDimension::Lint,
                command: vec!["npm".to_string(), "run".to_string(), "lint".to_string()],
            },
            Arc::new(OneShotWorkspace {
                output: CommandOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    killed: false,
                },
            }),
        )
    }

    #[tokio::test]
    async fn test_passing_command_without_score_scores_hundred() {
        let outcome = check_with(0, "all clean\n").run(Uuid::new_v4()).await.unwrap();
        assert!(outcome.passed);
        assert!((outcome.score - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failing_command_without_score_scores_zero() {
        let outcome = check_with(1, "problems\n").run(Uuid::new_v4()).await.unwrap();
        assert!(!outcome.passed);
        assert!((outcome.score - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_numeric_last_line_is_taken_as_score() {
        let outcome = check_with(0, "report written\n87.5\n")
            .run(Uuid::new_v4())
            .await
            .unwrap();
        assert!(outcome.passed);
        assert!((outcome.score - 87.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_out_of_range_number_is_ignored() {
        let outcome = check_with(0, "142\n").run(Uuid::new_v4()).await.unwrap();
        assert!((outcome.score - 100.0).abs() < 1e-9);
    }
}
