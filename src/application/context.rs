//! Application context - builds and wires the service graph.
//!
//! Everything is constructed here once and shared through `Arc`; there are
//! no globals. The agent is either the spawned app-server process or the
//! in-process mock, selected at build time.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::Config;
use crate::domain::ports::{AgentSession, QualityCheck, Reviewer, Workspace};
use crate::infrastructure::agent::{AppServerSession, MockAgentSession};
use crate::infrastructure::checks::CommandQualityCheck;
use crate::infrastructure::review::AgentReviewer;
use crate::infrastructure::storage::StateStore;
use crate::infrastructure::workspace::GitWorkspace;
use crate::services::{
    AutonomousOrchestrator, FixLoopService, GuardrailEnforcer, LearningLog, QualityGate,
    ReviewLoopService, TaskRegistry, Verifier,
};

/// Fully wired application services.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub registry: Arc<TaskRegistry>,
    pub workspace: Arc<dyn Workspace>,
    pub agent: Arc<dyn AgentSession>,
    pub learning: Arc<LearningLog>,
    pub fix_loop: Arc<FixLoopService>,
    pub quality_gate: Arc<QualityGate>,
    pub review_loop: Arc<ReviewLoopService>,
    pub orchestrator: Arc<AutonomousOrchestrator>,
}

impl AppContext {
    /// Build the service graph. With `mock_agent` set, turns complete
    /// immediately in-process instead of going to the app server.
    pub async fn build(config: Config, mock_agent: bool) -> DomainResult<Self> {
        let store = Arc::new(StateStore::new(config.storage.state_dir.clone()));
        let registry = Arc::new(
            TaskRegistry::load(Arc::clone(&store), config.fix_loop.turn_budget).await?,
        );

        let workspace: Arc<dyn Workspace> =
            Arc::new(GitWorkspace::new(config.workspace.clone()));
        let agent: Arc<dyn AgentSession> = if mock_agent {
            Arc::new(MockAgentSession::new())
        } else {
            Arc::new(AppServerSession::spawn(&config.agent)?)
        };
        let turn_timeout = Duration::from_secs(config.agent.turn_timeout_secs);

        let verifier = Arc::new(Verifier::new(
            Arc::clone(&workspace),
            config.verify.clone(),
        ));
        let guardrails = Arc::new(GuardrailEnforcer::new(
            Arc::clone(&registry),
            Arc::clone(&workspace),
            config.guardrails.clone(),
        ));
        let learning = Arc::new(
            LearningLog::load(Arc::clone(&store), config.storage.learning_capacity).await?,
        );
        let fix_loop = Arc::new(FixLoopService::new(
            Arc::clone(&registry),
            Arc::clone(&verifier),
            Arc::clone(&guardrails),
            Arc::clone(&agent),
            Arc::clone(&workspace),
            Arc::clone(&learning),
            config.fix_loop.clone(),
            turn_timeout,
        ));

        let checks: Vec<Arc<dyn QualityCheck>> = config
            .quality
            .checks
            .iter()
            .map(|check| {
                Arc::new(CommandQualityCheck::new(
                    check.clone(),
                    Arc::clone(&workspace),
                )) as Arc<dyn QualityCheck>
            })
            .collect();
        let quality_gate = Arc::new(QualityGate::new(checks));

        let reviewer: Arc<dyn Reviewer> = Arc::new(AgentReviewer::new(
            Arc::clone(&agent),
            Arc::clone(&registry),
            turn_timeout,
        ));
        let review_loop = Arc::new(ReviewLoopService::new(
            Arc::clone(&registry),
            reviewer,
            Arc::clone(&agent),
            Arc::clone(&workspace),
            Arc::clone(&guardrails),
            config.review.clone(),
            turn_timeout,
        ));

        let orchestrator = Arc::new(
            AutonomousOrchestrator::load(
                Arc::clone(&registry),
                Arc::clone(&fix_loop),
                Arc::clone(&quality_gate),
                Arc::clone(&review_loop),
                Arc::clone(&guardrails),
                Arc::clone(&agent),
                Arc::clone(&workspace),
                Arc::clone(&store),
                config.clone(),
            )
            .await?,
        );

        Ok(Self {
            config,
            store,
            registry,
            workspace,
            agent,
            learning,
            fix_loop,
            quality_gate,
            review_loop,
            orchestrator,
        })
    }
}
