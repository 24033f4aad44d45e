//! Verify-fix loop.
//!
//! Alternates verification and repair turns until verification passes or
//! the loop gives up. Two stop conditions besides success: a repair budget
//! (`max_iterations`) and stagnation detection on the workspace diff
//! fingerprint. Every iteration emits a learning record and is checked
//! against the guardrails, and every agent turn is accounted against the
//! task's lifetime turn budget.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FixAbortReason, FixLoopConfig, FixLoopResult, LearningRecord, TaskFailure, TaskStatus,
    VerifyResult,
};
use crate::domain::ports::{AgentSession, TurnResult, Workspace};
use crate::services::guardrails::GuardrailEnforcer;
use crate::services::learning::LearningLog;
use crate::services::task_registry::TaskRegistry;
use crate::services::verifier::Verifier;

/// Drives the verify-fix cycle for a task.
pub struct FixLoopService {
    registry: Arc<TaskRegistry>,
    verifier: Arc<Verifier>,
    guardrails: Arc<GuardrailEnforcer>,
    agent: Arc<dyn AgentSession>,
    workspace: Arc<dyn Workspace>,
    learning: Arc<LearningLog>,
    config: FixLoopConfig,
    turn_timeout: Duration,
}

impl FixLoopService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TaskRegistry>,
        verifier: Arc<Verifier>,
        guardrails: Arc<GuardrailEnforcer>,
        agent: Arc<dyn AgentSession>,
        workspace: Arc<dyn Workspace>,
        learning: Arc<LearningLog>,
        config: FixLoopConfig,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            verifier,
            guardrails,
            agent,
            workspace,
            learning,
            config,
            turn_timeout,
        }
    }

    /// Run the verify-fix cycle until verification passes or the loop gives
    /// up, then promote the task to ready on success. Aborts fail the task
    /// with the abort reason.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn fix_until_green(
        &self,
        task_id: Uuid,
        max_iterations: Option<u32>,
    ) -> DomainResult<FixLoopResult> {
        let result = self.repair_cycle(task_id, max_iterations).await?;
        if result.success {
            self.registry.transition(task_id, TaskStatus::Ready).await?;
        }
        Ok(result)
    }

    /// The verify-fix cycle without the final promotion. The orchestrator
    /// uses this form between phases, where the task must stay verifiable
    /// for subsequent turns.
    pub async fn repair_cycle(
        &self,
        task_id: Uuid,
        max_iterations: Option<u32>,
    ) -> DomainResult<FixLoopResult> {
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);
        let task = self
            .registry
            .get(task_id)
            .await
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let thread_id = task.thread_id.ok_or_else(|| {
            DomainError::ValidationFailed(format!("task {task_id} has no agent thread"))
        })?;

        if task.status == TaskStatus::Mutating {
            self.registry
                .transition(task_id, TaskStatus::Verifying)
                .await?;
        }

        let mut verify = self.verifier.verify(task_id).await?;
        if verify.success() {
            info!(task_id = %task_id, "Verification green without repair");
            return Ok(FixLoopResult::succeeded(0, verify));
        }

        let mut fingerprint = self.workspace.diff_fingerprint(task_id).await?;
        let mut identical_streak: u32 = 0;

        for iteration in 1..=max_iterations {
            self.registry
                .transition(task_id, TaskStatus::Fixing)
                .await?;

            let signature = error_signature(&verify);
            let prompt = build_fix_prompt(&verify);
            let turn = self.run_fix_turn(task_id, thread_id, &prompt).await?;
            if !turn.is_ok() {
                // A timed-out or errored turn spends its iteration; the next
                // iteration retries with the same failure set.
                let reason = turn
                    .error
                    .unwrap_or_else(|| "agent turn failed".to_string());
                warn!(task_id = %task_id, iteration, error = %reason, "Repair turn failed");
                self.registry
                    .transition(task_id, TaskStatus::Verifying)
                    .await?;
                self.learning
                    .record(LearningRecord::new(
                        task_id,
                        signature,
                        fingerprint.clone(),
                        iteration,
                        false,
                    ))
                    .await?;
                continue;
            }
            self.guardrails.enforce(task_id).await?;

            self.registry
                .transition(task_id, TaskStatus::Verifying)
                .await?;
            verify = self.verifier.verify(task_id).await?;
            let new_fingerprint = self.workspace.diff_fingerprint(task_id).await?;

            self.learning
                .record(LearningRecord::new(
                    task_id,
                    signature,
                    new_fingerprint.clone(),
                    iteration,
                    verify.success(),
                ))
                .await?;

            if verify.success() {
                info!(task_id = %task_id, iteration, "Verification green after repair");
                return Ok(FixLoopResult::succeeded(iteration, verify));
            }

            if new_fingerprint == fingerprint {
                identical_streak += 1;
            } else {
                identical_streak = 0;
                fingerprint = new_fingerprint;
            }

            if identical_streak >= self.config.stuck_threshold {
                warn!(
                    task_id = %task_id,
                    iteration,
                    streak = identical_streak,
                    "Fix loop stuck, diff fingerprint unchanged"
                );
                self.registry
                    .fail(
                        task_id,
                        TaskFailure::new(format!(
                            "fix loop stuck after {identical_streak} identical diffs"
                        )),
                    )
                    .await?;
                return Ok(FixLoopResult::aborted(
                    FixAbortReason::Stuck,
                    iteration,
                    verify,
                ));
            }
        }

        warn!(task_id = %task_id, max_iterations, "Fix iteration budget exhausted");
        self.registry
            .fail(
                task_id,
                TaskFailure::new(format!(
                    "verification still failing after {max_iterations} repair iterations"
                )),
            )
            .await?;
        Ok(FixLoopResult::aborted(
            FixAbortReason::BudgetExhausted,
            max_iterations,
            verify,
        ))
    }

    /// Submit one repair turn and await its completion. The turn is counted
    /// against the lifetime budget before it is submitted; budget exhaustion
    /// is fatal for the task. A timed-out or errored turn is returned to the
    /// caller, not raised as an error.
    async fn run_fix_turn(
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

/// Build the repair prompt from a failing verification, listing parsed
/// failures in repair-priority order, or falling back to the raw output
/// tail when nothing was parseable.
fn build_fix_prompt(verify: &VerifyResult) -> String {
    let mut prompt = String::from(
        "Verification failed. Fix the following problems, starting from the top:\n",
    );
    let prioritized = verify.prioritized_failures();
    if prioritized.is_empty() {
        let _ = write!(
            prompt,
            "\nThe verification command exited with code {}. Raw output tail:\n{}",
            verify.exit_code, verify.raw_tail
        );
    } else {
        for failure in prioritized {
            match &failure.file {
                Some(file) => {
                    let _ = writeln!(
                        prompt,
                        "- [{}] {}: {}",
                        failure.category.as_str(),
                        file,
                        failure.message
                    );
                }
                None => {
                    let _ = writeln!(
                        prompt,
                        "- [{}] {}",
                        failure.category.as_str(),
                        failure.message
                    );
                }
            }
        }
    }
    prompt.push_str("\nDo not modify protected configuration files.");
    prompt
}

/// Compact signature of the failure set an iteration is repairing.
fn error_signature(verify: &VerifyResult) -> String {
    let prioritized = verify.prioritized_failures();
    if prioritized.is_empty() {
        return format!("exit {}", verify.exit_code);
    }
    prioritized
        .iter()
        .take(3)
        .map(|f| format!("{}: {}", f.category.as_str(), f.message))
        .collect::<Vec<_>>()
        .join(" | ")
}
