//! In-process mock agent for development and tests.
//!
//! Completes every turn immediately with a scripted or default result and
//! records the prompts it saw. Lets the whole control plane run without a
//! real app-server binary.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{AgentSession, SandboxPolicy, TurnHandle, TurnResult};

/// Scripted agent session. With an empty script every turn succeeds with a
/// canned message.
#[derive(Default)]
pub struct MockAgentSession {
    script: Mutex<VecDeque<TurnResult>>,
    prompts: Mutex<Vec<String>>,
    threads: Mutex<Vec<(Uuid, PathBuf, SandboxPolicy)>>,
}

impl MockAgentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results returned by subsequent turns, in order.
    pub async fn script(&self, results: Vec<TurnResult>) {
        let mut script = self.script.lock().await;
        script.extend(results);
    }

    /// Every prompt submitted so far, in order.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    /// Threads started so far.
    pub async fn threads(&self) -> Vec<(Uuid, PathBuf, SandboxPolicy)> {
        self.threads.lock().await.clone()
    }
}

#[async_trait]
impl AgentSession for MockAgentSession {
    async fn start_thread(&self, workdir: &Path, policy: SandboxPolicy) -> DomainResult<Uuid> {
        let thread_id = Uuid::new_v4();
        debug!(thread_id = %thread_id, workdir = %workdir.display(), "Mock thread started");
        self.threads
            .lock()
            .await
            .push((thread_id, workdir.to_path_buf(), policy));
        Ok(thread_id)
    }

    async fn submit_turn(&self, _thread_id: Uuid, prompt: &str) -> DomainResult<TurnHandle> {
        self.prompts.lock().await.push(prompt.to_string());
        Ok(TurnHandle(Uuid::new_v4()))
    }

    async fn await_completion(
        &self,
        _thread_id: Uuid,
        _handle: TurnHandle,
        _timeout: Duration,
    ) -> DomainResult<TurnResult> {
        Ok(self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| TurnResult::ok(Some("mock turn completed".to_string()))))
    }

    async fn stop(&self, thread_id: Uuid) -> DomainResult<()> {
        debug!(thread_id = %thread_id, "Mock thread stopped");
        Ok(())
    }
}
