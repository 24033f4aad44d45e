//! Autonomous orchestrator.
//!
//! Drives an objective end-to-end through a fixed multi-phase plan:
//! planning provisions the workspace and agent thread, executing runs one
//! agent turn plus a repair cycle per phase, validating scores the result,
//! committing lands the branch and opens a pull request, and reviewing
//! closes with structured review rounds. Phase failures are tolerated up
//! to a consecutive-failure breaker; completed work is still committed
//! when later phases fail. Cancellation is cooperative and observed at
//! phase and stage boundaries only - a submitted agent turn always runs
//! to completion.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AutonomousRun, Checkpoint, Config, ExecutionPlan, PhaseKind, PhaseStatus, QualityScore,
    RunFailure, RunStatus, TaskFailure, TaskStatus,
};
use crate::domain::ports::{AgentSession, SandboxPolicy, Workspace};
use crate::infrastructure::storage::{BoundedLog, StateStore};
use crate::services::fix_loop::FixLoopService;
use crate::services::guardrails::GuardrailEnforcer;
use crate::services::quality_gate::QualityGate;
use crate::services::review_loop::ReviewLoopService;
use crate::services::task_registry::TaskRegistry;

const RUNS_SNAPSHOT: &str = "runs";
const PLANS_SNAPSHOT: &str = "plans";
const CHECKPOINTS_SNAPSHOT: &str = "checkpoints";

/// Why a phase stopped, and what the rest of the run may still do.
struct PhaseError {
    reason: String,
    /// Stop executing further phases
    fatal: bool,
    /// The workspace diff must not be committed (guardrail violations)
    taints_commit: bool,
}

struct PhaseOutcome {
    summary: String,
    fix_iterations: u32,
}

/// Orchestrates autonomous runs over the task and loop services.
pub struct AutonomousOrchestrator {
    registry: Arc<TaskRegistry>,
    fix_loop: Arc<FixLoopService>,
    quality_gate: Arc<QualityGate>,
    review_loop: Arc<ReviewLoopService>,
    guardrails: Arc<GuardrailEnforcer>,
    agent: Arc<dyn AgentSession>,
    workspace: Arc<dyn Workspace>,
    store: Arc<StateStore>,
    config: Config,
    runs: RwLock<HashMap<Uuid, AutonomousRun>>,
    plans: RwLock<HashMap<Uuid, ExecutionPlan>>,
    checkpoints: RwLock<HashMap<Uuid, BoundedLog<Checkpoint>>>,
    cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    run_slots: Arc<Semaphore>,
}

impl AutonomousOrchestrator {
    /// Create the orchestrator, restoring persisted runs. Runs that were
    /// in flight when the process stopped are marked failed; their agent
    /// threads are gone and cannot be resumed.
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        registry: Arc<TaskRegistry>,
        fix_loop: Arc<FixLoopService>,
        quality_gate: Arc<QualityGate>,
        review_loop: Arc<ReviewLoopService>,
        guardrails: Arc<GuardrailEnforcer>,
        agent: Arc<dyn AgentSession>,
        workspace: Arc<dyn Workspace>,
        store: Arc<StateStore>,
        config: Config,
    ) -> DomainResult<Self> {
        let mut runs: HashMap<Uuid, AutonomousRun> =
            store.load(RUNS_SNAPSHOT).await?.unwrap_or_default();
        let plans: HashMap<Uuid, ExecutionPlan> =
            store.load(PLANS_SNAPSHOT).await?.unwrap_or_default();
        let checkpoints: HashMap<Uuid, BoundedLog<Checkpoint>> =
            store.load(CHECKPOINTS_SNAPSHOT).await?.unwrap_or_default();

        let mut interrupted = 0;
        for run in runs.values_mut() {
            if !run.status.is_terminal() {
                run.status = RunStatus::Failed;
                run.failure = Some(RunFailure::general("interrupted by process restart"));
                run.updated_at = chrono::Utc::now();
                interrupted += 1;
            }
        }
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted runs as failed");
            store.save(RUNS_SNAPSHOT, &runs).await?;
        }

        let max_concurrent = config.orchestrator.max_concurrent_runs.max(1);
        Ok(Self {
            registry,
            fix_loop,
            quality_gate,
            review_loop,
            guardrails,
            agent,
            workspace,
            store,
            config,
            runs: RwLock::new(runs),
            plans: RwLock::new(plans),
            checkpoints: RwLock::new(checkpoints),
            cancel_tokens: Mutex::new(HashMap::new()),
            run_slots: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    /// Start an autonomous run for the objective. Returns the run id
    /// immediately; the run proceeds in the background, bounded by the
    /// concurrent-run limit.
    #[instrument(skip(self, objective))]
    pub async fn start(self: &Arc<Self>, objective: String) -> DomainResult<Uuid> {
        let suffix = Uuid::new_v4().simple().to_string();
        let branch = format!("drover/run-{}", &suffix[..8]);
        let task = self.registry.create_task(None, &branch).await?;

        let run = AutonomousRun::new(objective, task.id);
        let run_id = run.id;
        let plan = ExecutionPlan::standard(task.id);

        {
            let mut runs = self.runs.write().await;
            runs.insert(run_id, run);
            self.store.save(RUNS_SNAPSHOT, &*runs).await?;
        }
        {
            let mut plans = self.plans.write().await;
            plans.insert(run_id, plan);
            self.store.save(PLANS_SNAPSHOT, &*plans).await?;
        }

        let token = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .await
            .insert(run_id, token.clone());

        info!(run_id = %run_id, task_id = %task.id, branch = %branch, "Autonomous run started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(run_id, token).await;
        });

        Ok(run_id)
    }

    /// Current snapshot of a run.
    pub async fn get(&self, run_id: Uuid) -> Option<AutonomousRun> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// All runs, newest first.
    pub async fn list(&self) -> Vec<AutonomousRun> {
        let mut all: Vec<AutonomousRun> = self.runs.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// The execution plan of a run.
    pub async fn plan(&self, run_id: Uuid) -> Option<ExecutionPlan> {
        self.plans.read().await.get(&run_id).cloned()
    }

    /// Retained checkpoints for a task, oldest first.
    pub async fn checkpoints(&self, task_id: Uuid) -> Vec<Checkpoint> {
        self.checkpoints
            .read()
            .await
            .get(&task_id)
            .map(|log| log.entries().to_vec())
            .unwrap_or_default()
    }

    /// Request cancellation of a run. The request is honored at the next
    /// phase or stage boundary; a terminal run is returned unchanged.
    pub async fn cancel(&self, run_id: Uuid) -> DomainResult<AutonomousRun> {
        let run = self
            .get(run_id)
            .await
            .ok_or(DomainError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        if let Some(token) = self.cancel_tokens.lock().await.get(&run_id) {
            info!(run_id = %run_id, "Cancellation requested");
            token.cancel();
        }
        Ok(run)
    }

    async fn drive(self: Arc<Self>, run_id: Uuid, token: CancellationToken) {
        // Queued runs wait here; the caller already has the run id.
        let _slot = match Arc::clone(&self.run_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        if let Err(e) = self.run_to_completion(run_id, &token).await {
            error!(run_id = %run_id, error = %e, "Run aborted by internal error");
            let _ = self
                .fail_run(run_id, RunFailure::general(e.to_string()))
                .await;
        }

        self.cancel_tokens.lock().await.remove(&run_id);

        // Best-effort thread teardown.
        if let Some(run) = self.get(run_id).await {
            if let Some(task) = self.registry.get(run.task_id).await {
                if let Some(thread_id) = task.thread_id {
                    if let Err(e) = self.agent.stop(thread_id).await {
                        warn!(run_id = %run_id, error = %e, "Failed to stop agent thread");
                    }
                }
            }
        }
    }

    #[instrument(skip(self, token), fields(run_id = %run_id))]
    async fn run_to_completion(
        &self,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> DomainResult<()> {
        let run = self
            .get(run_id)
            .await
            .ok_or(DomainError::RunNotFound(run_id))?;
        let task_id = run.task_id;
        let objective = run.objective.clone();

        // Planning: workspace and agent thread.
        let thread_id = match self.plan_run(task_id).await {
            Ok(thread_id) => thread_id,
            Err(e) => {
                return self
                    .fail_run(run_id, RunFailure::general(format!("planning failed: {e}")))
                    .await;
            }
        };

        if token.is_cancelled() {
            return self.cancel_run(run_id).await;
        }

        // Executing: one turn plus a repair cycle per phase.
        self.update_run(run_id, |r| r.status = RunStatus::Executing)
            .await?;
        let taints_commit = self
            .execute_phases(run_id, task_id, thread_id, &objective, token)
            .await?;

        if token.is_cancelled() {
            return self.cancel_run(run_id).await;
        }

        let plan = self
            .plan(run_id)
            .await
            .ok_or(DomainError::RunNotFound(run_id))?;
        let completed = plan.completed_count();
        if completed == 0 {
            return self
                .fail_run(
                    run_id,
                    RunFailure::general("no phase completed, nothing to commit"),
                )
                .await;
        }
        if taints_commit {
            return self
                .fail_run(
                    run_id,
                    RunFailure::general("workspace contains guardrail violations, refusing to commit"),
                )
                .await;
        }

        // Validating: quality score, gated only when a threshold is set. A
        // first gate failure earns one extra fix pass before the run fails.
        self.update_run(run_id, |r| r.status = RunStatus::Validating)
            .await?;
        let mut score = self.quality_gate.score(task_id).await?;
        let threshold = self.config.orchestrator.quality_threshold;
        let mut gate_passed = threshold <= 0.0 || score.gate_passed(threshold);
        self.update_run(run_id, |r| r.quality = Some(score.clone()))
            .await?;
        if !gate_passed {
            match self.quality_fix_pass(task_id, thread_id, &score).await {
                Ok(()) => {
                    score = self.quality_gate.score(task_id).await?;
                    gate_passed = score.gate_passed(threshold);
                    self.update_run(run_id, |r| r.quality = Some(score.clone()))
                        .await?;
                }
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Quality fix pass failed");
                }
            }
        }
        if !gate_passed {
            return self
                .fail_run(
                    run_id,
                    RunFailure::general(format!(
                        "quality gate failed: overall {:.1} against threshold {threshold}",
                        score.overall
                    )),
                )
                .await;
        }

        if token.is_cancelled() {
            return self.cancel_run(run_id).await;
        }

        // Committing: land the branch and open the pull request.
        self.update_run(run_id, |r| r.status = RunStatus::Committing)
            .await?;
        match self
            .commit_run(task_id, &objective, completed, plan.phases.len())
            .await
        {
            Ok((commit, pr_url)) => {
                self.update_run(run_id, |r| {
                    r.commit = Some(commit.clone());
                    r.pr_url = Some(pr_url.clone());
                })
                .await?;
            }
            Err(e) => {
                return self
                    .fail_run(run_id, RunFailure::general(format!("commit failed: {e}")))
                    .await;
            }
        }

        // Reviewing: structured review rounds, when enabled.
        if self.config.review.enabled {
            if token.is_cancelled() {
                return self.cancel_run(run_id).await;
            }
            self.update_run(run_id, |r| r.status = RunStatus::Reviewing)
                .await?;
            match self.review_loop.review_until_approved(task_id, None).await {
                Ok(result) => {
                    if result.rounds > 1 {
                        // Review fix turns changed the workspace.
                        self.workspace
                            .commit_all(task_id, "Apply review fixes")
                            .await?;
                        self.workspace.push(task_id).await?;
                    }
                    self.update_run(run_id, |r| r.review_approved = Some(result.approved))
                        .await?;
                }
                Err(e) => {
                    return self
                        .fail_run(run_id, RunFailure::general(format!("review failed: {e}")))
                        .await;
                }
            }
        }

        self.update_run(run_id, |r| {
            r.status = RunStatus::Completed;
            r.completed_at = Some(chrono::Utc::now());
        })
        .await?;
        info!(run_id = %run_id, "Autonomous run completed");
        Ok(())
    }

    async fn plan_run(&self, task_id: Uuid) -> DomainResult<Uuid> {
        let task = self
            .registry
            .get(task_id)
            .await
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let path = self.workspace.provision(task_id, &task.branch).await?;
        self.registry
            .set_workspace(task_id, &path.to_string_lossy())
            .await?;
        let thread_id = self
            .agent
            .start_thread(&path, SandboxPolicy::WorkspaceWrite)
            .await?;
        self.registry.set_thread(task_id, thread_id).await?;
        Ok(thread_id)
    }

    /// Run the phases in order. Returns whether the workspace diff is
    /// tainted and must not be committed.
    async fn execute_phases(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        thread_id: Uuid,
        objective: &str,
        token: &CancellationToken,
    ) -> DomainResult<bool> {
        let phase_count = self
            .plan(run_id)
            .await
            .map_or(0, |plan| plan.phases.len());
        let breaker_threshold = self.config.orchestrator.breaker_threshold.max(1);
        let mut consecutive_failures: u32 = 0;
        let mut context: Vec<String> = Vec::new();
        let mut taints_commit = false;

        for index in 0..phase_count {
            if token.is_cancelled() {
                info!(run_id = %run_id, phase = index, "Cancellation observed at phase boundary");
                return Ok(taints_commit);
            }

            let kind = self
                .update_phase(run_id, index, |p| {
                    p.status = PhaseStatus::InProgress;
                    p.started_at = Some(chrono::Utc::now());
                })
                .await?;

            info!(run_id = %run_id, phase = kind.as_str(), "Phase started");
            match self
                .run_phase(task_id, thread_id, kind, objective, &context)
                .await
            {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    self.update_phase(run_id, index, |p| {
                        p.status = PhaseStatus::Completed;
                        p.fix_iterations = outcome.fix_iterations;
                        p.completed_at = Some(chrono::Utc::now());
                    })
                    .await?;
                    context.push(format!("{}: {}", kind.as_str(), outcome.summary));
                    self.checkpoint(
                        task_id,
                        Some(thread_id),
                        format!("{} phase completed ({}/{phase_count})", kind.as_str(), index + 1),
                    )
                    .await?;
                    info!(run_id = %run_id, phase = kind.as_str(), "Phase completed");
                }
                Err(phase_err) => {
                    consecutive_failures += 1;
                    taints_commit = taints_commit || phase_err.taints_commit;
                    self.update_phase(run_id, index, |p| {
                        p.status = PhaseStatus::Failed;
                        p.error = Some(phase_err.reason.clone());
                        p.completed_at = Some(chrono::Utc::now());
                    })
                    .await?;
                    warn!(
                        run_id = %run_id,
                        phase = kind.as_str(),
                        reason = %phase_err.reason,
                        consecutive = consecutive_failures,
                        "Phase failed"
                    );

                    if phase_err.fatal {
                        self.update_run(run_id, |r| {
                            r.failure =
                                Some(RunFailure::at_phase(index, kind.as_str(), &phase_err.reason));
                        })
                        .await?;
                        return Ok(taints_commit);
                    }
                    if consecutive_failures >= breaker_threshold {
                        warn!(run_id = %run_id, "Circuit breaker tripped");
                        self.update_run(run_id, |r| {
                            r.failure = Some(RunFailure::at_phase(
                                index,
                                kind.as_str(),
                                format!(
                                    "circuit breaker: {consecutive_failures} consecutive phase failures"
                                ),
                            ));
                        })
                        .await?;
                        return Ok(taints_commit);
                    }
                }
            }
        }
        Ok(taints_commit)
    }

    /// One phase: an agent turn carrying the phase goal and accumulated
    /// context, guardrails, then a bounded repair cycle.
    async fn run_phase(
        &self,
        task_id: Uuid,
        thread_id: Uuid,
        kind: PhaseKind,
        objective: &str,
        context: &[String],
    ) -> Result<PhaseOutcome, PhaseError> {
        self.begin_phase_turn(task_id).await?;

        let prompt = phase_prompt(objective, kind, context);
        let summary = self.phase_turn(task_id, thread_id, &prompt).await?;

        match self.guardrails.enforce(task_id).await {
            Ok(()) => {}
            Err(e @ DomainError::GuardrailViolation { .. }) => {
                return Err(PhaseError {
                    reason: e.to_string(),
                    fatal: true,
                    taints_commit: true,
                });
            }
            Err(e) => {
                return Err(PhaseError {
                    reason: e.to_string(),
                    fatal: false,
                    taints_commit: false,
                });
            }
        }

        self.registry
            .transition(task_id, TaskStatus::Verifying)
            .await
            .map_err(|e| PhaseError {
                reason: e.to_string(),
                fatal: false,
                taints_commit: false,
            })?;

        let max_fixes = self.config.orchestrator.max_phase_fixes;
        match self.fix_loop.repair_cycle(task_id, Some(max_fixes)).await {
            Ok(result) if result.success => Ok(PhaseOutcome {
                summary,
                fix_iterations: result.iterations,
            }),
            Ok(result) => Err(PhaseError {
                reason: result.abort.map_or_else(
                    || "verification failed".to_string(),
                    |a| format!("repair cycle aborted: {}", a.as_str()),
                ),
                fatal: false,
                taints_commit: false,
            }),
            Err(e) => {
                let fatal = matches!(
                    e,
                    DomainError::TurnBudgetExhausted { .. } | DomainError::GuardrailViolation { .. }
                );
                let taints_commit = matches!(e, DomainError::GuardrailViolation { .. });
                Err(PhaseError {
                    reason: e.to_string(),
                    fatal,
                    taints_commit,
                })
            }
        }
    }

    /// Move the task into a mutating-capable state for the phase turn,
    /// recovering from a previous phase failure when possible. Guardrail
    /// failures are never auto-recovered.
    async fn begin_phase_turn(&self, task_id: Uuid) -> Result<(), PhaseError> {
        let task = self.registry.get(task_id).await.ok_or_else(|| PhaseError {
            reason: format!("task {task_id} not found"),
            fatal: true,
            taints_commit: false,
        })?;

        let next = match task.status {
            TaskStatus::Created => TaskStatus::Mutating,
            TaskStatus::Verifying => TaskStatus::Fixing,
            TaskStatus::Failed => {
                if task.failure.as_ref().is_some_and(|f| f.guardrail) {
                    return Err(PhaseError {
                        reason: "task failed on a guardrail violation, not recoverable".to_string(),
                        fatal: true,
                        taints_commit: true,
                    });
                }
                TaskStatus::Mutating
            }
            other => {
                return Err(PhaseError {
                    reason: format!("task in unexpected state {other} for a phase turn"),
                    fatal: true,
                    taints_commit: false,
                });
            }
        };

        self.registry
            .transition(task_id, next)
            .await
            .map_err(|e| PhaseError {
                reason: e.to_string(),
                fatal: true,
                taints_commit: false,
            })?;
        Ok(())
    }

    async fn phase_turn(
        &self,
        task_id: Uuid,
        thread_id: Uuid,
        prompt: &str,
    ) -> Result<String, PhaseError> {
        if let Err(e) = self.registry.note_turn(task_id).await {
            let fatal = matches!(e, DomainError::TurnBudgetExhausted { .. });
            if fatal {
                let _ = self
                    .registry
                    .fail(task_id, TaskFailure::new(e.to_string()))
                    .await;
            }
            return Err(PhaseError {
                reason: e.to_string(),
                fatal,
                taints_commit: false,
            });
        }

        let turn = async {
            let handle = self.agent.submit_turn(thread_id, prompt).await?;
            self.agent
                .await_completion(
                    thread_id,
                    handle,
                    Duration::from_secs(self.config.agent.turn_timeout_secs),
                )
                .await
        }
        .await
        .map_err(|e| PhaseError {
            reason: e.to_string(),
            fatal: false,
            taints_commit: false,
        })?;

        if turn.is_ok() {
            Ok(turn
                .message
                .unwrap_or_else(|| "phase turn completed".to_string()))
        } else {
            let reason = turn
                .error
                .unwrap_or_else(|| "agent turn failed".to_string());
            let _ = self
                .registry
                .fail(task_id, TaskFailure::new(reason.clone()))
                .await;
            Err(PhaseError {
                reason,
                fatal: false,
                taints_commit: false,
            })
        }
    }

    /// One extra repair attempt after a quality-gate failure: a turn
    /// prompted with the weak dimensions, then the usual repair cycle.
    async fn quality_fix_pass(
        &self,
        task_id: Uuid,
        thread_id: Uuid,
        score: &QualityScore,
    ) -> DomainResult<()> {
        self.begin_phase_turn(task_id)
            .await
            .map_err(|e| DomainError::ValidationFailed(e.reason))?;
        let prompt = quality_fix_prompt(score);
        self.phase_turn(task_id, thread_id, &prompt)
            .await
            .map_err(|e| DomainError::ValidationFailed(e.reason))?;
        self.guardrails.enforce(task_id).await?;
        self.registry
            .transition(task_id, TaskStatus::Verifying)
            .await?;
        let result = self
            .fix_loop
            .repair_cycle(task_id, Some(self.config.orchestrator.max_phase_fixes))
            .await?;
        if !result.success {
            return Err(DomainError::ValidationFailed(
                "verification did not stabilize after the quality fix pass".to_string(),
            ));
        }
        Ok(())
    }

    async fn commit_run(
        &self,
        task_id: Uuid,
        objective: &str,
        completed: usize,
        total: usize,
    ) -> DomainResult<(String, String)> {
        let task = self
            .registry
            .get(task_id)
            .await
            .ok_or(DomainError::TaskNotFound(task_id))?;
        match task.status {
            TaskStatus::Ready => {}
            TaskStatus::Verifying | TaskStatus::Failed => {
                self.registry.transition(task_id, TaskStatus::Ready).await?;
            }
            other => {
                return Err(DomainError::ValidationFailed(format!(
                    "task in state {other} cannot be committed"
                )));
            }
        }

        let message = if completed == total {
            objective.to_string()
        } else {
            format!("{objective} (partial: {completed}/{total} phases)")
        };
        let commit = self.workspace.commit_all(task_id, &message).await?;
        self.workspace.push(task_id).await?;
        let body = format!(
            "Automated change for objective:\n\n{objective}\n\nPhases completed: {completed}/{total}"
        );
        let pr_url = self
            .workspace
            .open_pull_request(task_id, &message, &body)
            .await?;
        self.registry
            .transition(task_id, TaskStatus::PrOpened)
            .await?;
        info!(task_id = %task_id, commit = %commit, pr_url = %pr_url, "Branch committed and PR opened");
        Ok((commit, pr_url))
    }

    async fn checkpoint(
        &self,
        task_id: Uuid,
        thread_id: Option<Uuid>,
        description: String,
    ) -> DomainResult<()> {
        let mut checkpoints = self.checkpoints.write().await;
        let log = checkpoints
            .entry(task_id)
            .or_insert_with(|| BoundedLog::new(self.config.storage.checkpoint_capacity));
        log.push(Checkpoint::new(task_id, thread_id, description));
        self.store.save(CHECKPOINTS_SNAPSHOT, &*checkpoints).await
    }

    async fn update_run(
        &self,
        run_id: Uuid,
        mutate: impl FnOnce(&mut AutonomousRun) + Send,
    ) -> DomainResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or(DomainError::RunNotFound(run_id))?;
        mutate(run);
        run.updated_at = chrono::Utc::now();
        self.store.save(RUNS_SNAPSHOT, &*runs).await
    }

    async fn update_phase(
        &self,
        run_id: Uuid,
        index: usize,
        mutate: impl FnOnce(&mut crate::domain::models::Phase) + Send,
    ) -> DomainResult<PhaseKind> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&run_id)
            .ok_or(DomainError::RunNotFound(run_id))?;
        let phase = plan.phases.get_mut(index).ok_or_else(|| {
            DomainError::ValidationFailed(format!("plan has no phase at index {index}"))
        })?;
        mutate(phase);
        let kind = phase.kind;
        self.store.save(PLANS_SNAPSHOT, &*plans).await?;
        Ok(kind)
    }

    async fn fail_run(&self, run_id: Uuid, failure: RunFailure) -> DomainResult<()> {
        warn!(run_id = %run_id, reason = %failure.reason, "Run failed");
        self.update_run(run_id, |r| {
            r.status = RunStatus::Failed;
            // Keep a more specific phase-bound failure already recorded.
            if r.failure.is_none() {
                r.failure = Some(failure);
            }
            r.completed_at = Some(chrono::Utc::now());
        })
        .await
    }

    async fn cancel_run(&self, run_id: Uuid) -> DomainResult<()> {
        info!(run_id = %run_id, "Run cancelled");
        self.update_run(run_id, |r| {
            r.status = RunStatus::Cancelled;
            r.completed_at = Some(chrono::Utc::now());
        })
        .await
    }
}

/// The prompt for the extra fix pass after a quality-gate failure.
fn quality_fix_prompt(score: &QualityScore) -> String {
    let mut prompt = format!(
        "The change scored {:.1}/100 on the quality gate and did not pass. \
         Improve the weak areas below, then make sure verification still passes.\n",
        score.overall
    );
    for dim in &score.dimensions {
        if dim.available && !dim.passed {
            let _ = writeln!(
                prompt,
                "- {}: check failed (score {:.0})",
                dim.dimension.as_str(),
                dim.score
            );
        }
    }
    prompt
}

/// The prompt for one phase turn: objective, phase goal, and summaries of
/// the completed phases so far.
fn phase_prompt(objective: &str, kind: PhaseKind, context: &[String]) -> String {
    let mut prompt = format!("Objective: {objective}\n\nCurrent phase: {}\n", kind.as_str());
    prompt.push_str(kind.goal());
    if !context.is_empty() {
        prompt.push_str("\n\nCompleted so far:\n");
        for entry in context {
            prompt.push_str("- ");
            prompt.push_str(entry);
            prompt.push('\n');
        }
    }
    prompt
}
