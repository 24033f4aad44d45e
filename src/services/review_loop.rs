//! Review loop - structured review rounds with targeted fix turns.
//!
//! Each round reviews the current diff; error-severity findings block
//! approval and are turned into a fix prompt for one agent turn, then the
//! diff is reviewed again. Warnings and suggestions are surfaced but never
//! drive a turn. Exhausting `max_rounds` is reported as exhaustion, never
//! silently treated as approval.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ReviewConfig, ReviewLoopResult, ReviewReport, TaskFailure};
use crate::domain::ports::{AgentSession, Reviewer, TurnResult, Workspace};
use crate::services::guardrails::GuardrailEnforcer;
use crate::services::task_registry::TaskRegistry;

/// Drives review rounds for a task until approval or round exhaustion.
pub struct ReviewLoopService {
    registry: Arc<TaskRegistry>,
    reviewer: Arc<dyn Reviewer>,
    agent: Arc<dyn AgentSession>,
    workspace: Arc<dyn Workspace>,
    guardrails: Arc<GuardrailEnforcer>,
    config: ReviewConfig,
    turn_timeout: Duration,
}

impl ReviewLoopService {
    pub fn new(
        registry: Arc<TaskRegistry>,
        reviewer: Arc<dyn Reviewer>,
        agent: Arc<dyn AgentSession>,
        workspace: Arc<dyn Workspace>,
        guardrails: Arc<GuardrailEnforcer>,
        config: ReviewConfig,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reviewer,
            agent,
            workspace,
            guardrails,
            config,
            turn_timeout,
        }
    }

    /// Review the task's diff until approved or the round budget is spent.
    /// `max_rounds` overrides the configured budget for this call.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn review_until_approved(
        &self,
        task_id: Uuid,
        max_rounds: Option<u32>,
    ) -> DomainResult<ReviewLoopResult> {
        let task = self
            .registry
            .get(task_id)
            .await
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let thread_id = task.thread_id.ok_or_else(|| {
            DomainError::ValidationFailed(format!("task {task_id} has no agent thread"))
        })?;

        let max_rounds = max_rounds.unwrap_or(self.config.max_rounds).max(1);
        let mut last_report = ReviewReport::default();

        for round in 1..=max_rounds {
            let diff = self.workspace.diff(task_id).await?;
            last_report = self.reviewer.review(task_id, &diff).await?;

            if last_report.approved() {
                info!(
                    task_id = %task_id,
                    round,
                    findings = last_report.findings.len(),
                    "Review approved"
                );
                return Ok(ReviewLoopResult {
                    approved: true,
                    rounds: round,
                    last_report,
                    rounds_exhausted: false,
                });
            }

            let errors = last_report.errors().len();
            if round == max_rounds {
                warn!(task_id = %task_id, round, errors, "Review rounds exhausted");
                break;
            }

            info!(task_id = %task_id, round, errors, "Review found blocking findings, fixing");
            let prompt = build_review_fix_prompt(&last_report);
            let turn = self.run_review_fix_turn(task_id, thread_id, &prompt).await?;
            if turn.is_ok() {
                self.guardrails.enforce(task_id).await?;
            } else {
                // A failed fix turn spends its round; the next round
                // re-reviews the unchanged diff.
                let reason = turn
                    .error
                    .unwrap_or_else(|| "review fix turn failed".to_string());
                warn!(task_id = %task_id, round, error = %reason, "Review fix turn failed");
            }
        }

        Ok(ReviewLoopResult {
            approved: false,
            rounds: max_rounds,
            last_report,
            rounds_exhausted: true,
        })
    }

    /// Submit one fix turn and await its completion. Budget exhaustion is
    /// fatal for the task; a timed-out or errored turn is returned to the
    /// caller, not raised as an error.
    async fn run_review_fix_turn(
        &self,
        task_id: Uuid,
        thread_id: Uuid,
        prompt: &str,
    ) -> DomainResult<TurnResult> {
        if let Err(e) = self.registry.note_turn(task_id).await {
            if matches!(e, DomainError::TurnBudgetExhausted { .. }) {
                self.registry
                    .fail(task_id, TaskFailure::new(e.to_string()))
                    .await?;
            }
            return Err(e);
        }

        let handle = self.agent.submit_turn(thread_id, prompt).await?;
        self.agent
            .await_completion(thread_id, handle, self.turn_timeout)
            .await
    }
}

/// Build a fix prompt from a rejecting review. Only error-severity findings
/// are included; warnings and suggestions never drive a turn.
fn build_review_fix_prompt(report: &ReviewReport) -> String {
    let mut prompt =
        String::from("A code review found blocking problems. Address every item below:\n");
    for finding in report.errors() {
        match &finding.file {
            Some(file) => {
                let _ = writeln!(prompt, "- {}: {}", file, finding.message);
            }
            None => {
                let _ = writeln!(prompt, "- {}", finding.message);
            }
        }
    }
    prompt.push_str("\nOnly fix the listed problems. Do not refactor unrelated code.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FindingSeverity, GuardrailConfig, ReviewFinding, TaskStatus};
    use crate::domain::ports::{CommandOutput, SandboxPolicy, TurnHandle, TurnResult};
    use crate::infrastructure::storage::StateStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct PlainWorkspace;

    #[async_trait]
    impl Workspace for PlainWorkspace {
        async fn provision(&self, _: Uuid, _: &str) -> DomainResult<PathBuf> {
            Ok(PathBuf::from("/tmp/ws"))
        }
        async fn run(&self, _: Uuid, _: &[String]) -> DomainResult<CommandOutput> {
            Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                killed: false,
            })
        }
        async fn changed_files(&self, _: Uuid) -> DomainResult<Vec<String>> {
            Ok(vec!["src/app.ts".to_string()])
        }
        async fn diff(&self, _: Uuid) -> DomainResult<String> {
            Ok("diff --git a/src/app.ts b/src/app.ts".to_string())
        }
        async fn diff_fingerprint(&self, _: Uuid) -> DomainResult<String> {
            Ok("fp".to_string())
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

    struct ScriptedReviewer {
        reports: Mutex<VecDeque<ReviewReport>>,
    }

    impl ScriptedReviewer {
        fn new(reports: Vec<ReviewReport>) -> Self {
            Self {
                reports: Mutex::new(reports.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Reviewer for ScriptedReviewer {
        async fn review(&self, _: Uuid, _: &str) -> DomainResult<ReviewReport> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    /// Agent whose fix-turn results can be scripted; exhausted scripts
    /// answer ok.
    struct QuietAgent {
        turns: Mutex<u32>,
        results: Mutex<VecDeque<TurnResult>>,
    }

    #[async_trait]
    impl AgentSession for QuietAgent {
        async fn start_thread(&self, _: &Path, _: SandboxPolicy) -> DomainResult<Uuid> {
            Ok(Uuid::new_v4())
        }
        async fn submit_turn(&self, _: Uuid, _: &str) -> DomainResult<TurnHandle> {
            *self.turns.lock().unwrap() += 1;
            Ok(TurnHandle(Uuid::new_v4()))
        }
        async fn await_completion(
            &self,
            _: Uuid,
            _: TurnHandle,
            _: Duration,
        ) -> DomainResult<TurnResult> {
            Ok(self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| TurnResult::ok(None)))
        }
        async fn stop(&self, _: Uuid) -> DomainResult<()> {
            Ok(())
        }
    }

    fn rejecting(message: &str) -> ReviewReport {
        ReviewReport {
            findings: vec![ReviewFinding::new(FindingSeverity::Error, message)],
        }
    }

    fn nitpicky() -> ReviewReport {
        ReviewReport {
            findings: vec![
                ReviewFinding::new(FindingSeverity::Warning, "long function"),
                ReviewFinding::new(FindingSeverity::Suggestion, "rename variable"),
            ],
        }
    }

    async fn service(
        dir: &TempDir,
        reports: Vec<ReviewReport>,
    ) -> (ReviewLoopService, Arc<TaskRegistry>, Arc<QuietAgent>, Uuid) {
        let store = Arc::new(StateStore::new(dir.path()));
        let registry = Arc::new(TaskRegistry::load(store, 40).await.unwrap());
        let workspace: Arc<dyn Workspace> = Arc::new(PlainWorkspace);
        let agent = Arc::new(QuietAgent {
            turns: Mutex::new(0),
            results: Mutex::new(VecDeque::new()),
        });
        let guardrails = Arc::new(GuardrailEnforcer::new(
            Arc::clone(&registry),
            Arc::clone(&workspace),
            GuardrailConfig::default(),
        ));

        let task = registry.create_task(None, "drover/review").await.unwrap();
        registry.transition(task.id, TaskStatus::Mutating).await.unwrap();
        registry.transition(task.id, TaskStatus::Verifying).await.unwrap();
        registry.transition(task.id, TaskStatus::Ready).await.unwrap();
        registry.set_thread(task.id, Uuid::new_v4()).await.unwrap();

        let svc = ReviewLoopService::new(
            Arc::clone(&registry),
            Arc::new(ScriptedReviewer::new(reports)),
            Arc::clone(&agent) as Arc<dyn AgentSession>,
            workspace,
            guardrails,
            ReviewConfig::default(),
            Duration::from_secs(900),
        );
        (svc, registry, agent, task.id)
    }

    #[tokio::test]
    async fn test_warnings_and_suggestions_approve_without_turns() {
        let dir = TempDir::new().unwrap();
        let (svc, _, agent, task_id) = service(&dir, vec![nitpicky()]).await;

        let result = svc.review_until_approved(task_id, None).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.rounds, 1);
        assert!(!result.rounds_exhausted);
        assert_eq!(*agent.turns.lock().unwrap(), 0);
        // Non-blocking findings are still surfaced in the report.
        assert_eq!(result.last_report.findings.len(), 2);
    }

    #[tokio::test]
    async fn test_error_findings_drive_fix_turns_until_approved() {
        let dir = TempDir::new().unwrap();
        let (svc, _, agent, task_id) = service(
            &dir,
            vec![rejecting("unwrap on user input"), ReviewReport::default()],
        )
        .await;

        let result = svc.review_until_approved(task_id, None).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.rounds, 2);
        assert_eq!(*agent.turns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_round_exhaustion_is_reported_not_approved() {
        let dir = TempDir::new().unwrap();
        // Three rejecting rounds against the default max of 3: the loop
        // spends a fix turn after rounds 1 and 2, reviews once more, then
        // stops and reports exhaustion.
        let (svc, _, agent, task_id) = service(
            &dir,
            vec![rejecting("a"), rejecting("b"), rejecting("c")],
        )
        .await;

        let result = svc.review_until_approved(task_id, None).await.unwrap();
        assert!(!result.approved);
        assert!(result.rounds_exhausted);
        assert_eq!(result.rounds, 3);
        assert_eq!(*agent.turns.lock().unwrap(), 2);
        assert_eq!(result.last_report.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_fix_turn_timeout_spends_the_round_and_review_continues() {
        let dir = TempDir::new().unwrap();
        // Round 1 rejects and the fix turn times out; round 2 re-reviews
        // and approves.
        let (svc, _, agent, task_id) = service(
            &dir,
            vec![rejecting("unchecked input"), ReviewReport::default()],
        )
        .await;
        agent
            .results
            .lock()
            .unwrap()
            .push_back(TurnResult::timeout());

        let result = svc.review_until_approved(task_id, None).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.rounds, 2);
        assert_eq!(*agent.turns.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_per_call_round_override_caps_the_loop() {
        let dir = TempDir::new().unwrap();
        let (svc, _, agent, task_id) =
            service(&dir, vec![rejecting("a"), rejecting("b")]).await;

        let result = svc.review_until_approved(task_id, Some(1)).await.unwrap();
        assert!(!result.approved);
        assert!(result.rounds_exhausted);
        assert_eq!(result.rounds, 1);
        // The single allowed round never spends a fix turn.
        assert_eq!(*agent.turns.lock().unwrap(), 0);
    }

    #[test]
    fn test_fix_prompt_contains_only_error_findings() {
        let report = ReviewReport {
            findings: vec![
                ReviewFinding::new(FindingSeverity::Error, "missing null check"),
                ReviewFinding::new(FindingSeverity::Warning, "style nit"),
            ],
        };
        let prompt = build_review_fix_prompt(&report);
        assert!(prompt.contains("missing null check"));
        assert!(!prompt.contains("style nit"));
    }
}
