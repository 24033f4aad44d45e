//! Newline-delimited JSON client for the vendor agent app server.
//!
//! The app server is a child process speaking one JSON object per line on
//! stdin/stdout. Requests carry a numeric id and are answered by a response
//! with the same id; turn completion arrives later as an unsolicited
//! notification correlated by thread and turn id. A single reader task owns
//! stdout and routes messages to whoever is waiting.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentConfig;
use crate::domain::ports::{AgentSession, SandboxPolicy, TurnHandle, TurnResult};

/// How long a plain request/response exchange may take. Turn completion has
/// its own, much larger timeout supplied by the caller.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

enum TurnEvent {
    Waiting(oneshot::Sender<TurnResult>),
    Ready(TurnResult),
}

struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    turn_events: Mutex<HashMap<(Uuid, Uuid), TurnEvent>>,
}

/// Agent session backed by a spawned app-server process.
pub struct AppServerSession {
    stdin: Mutex<ChildStdin>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    _child: Mutex<Child>,
}

#[derive(Debug, Deserialize)]
struct TurnCompletedParams {
    thread_id: Uuid,
    turn_id: Uuid,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AppServerSession {
    /// Spawn the configured app-server process and start the reader task.
    pub fn spawn(config: &AgentConfig) -> DomainResult<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::AgentSession(format!("failed to spawn {}: {e}", config.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DomainError::AgentSession("app server has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::AgentSession("app server has no stdout".to_string()))?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            turn_events: Mutex::new(HashMap::new()),
        });

        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Err(e) = route_message(&reader_shared, &line).await {
                            warn!(error = %e, "Discarded unroutable app-server message");
                        }
                    }
                    Ok(None) => {
                        debug!("App server closed stdout");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "App server stdout read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            shared,
            next_id: AtomicU64::new(1),
            _child: Mutex::new(child),
        })
    }

    async fn request(&self, method: &str, params: Value) -> DomainResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;
        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| DomainError::AgentSession(e.to_string()))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| DomainError::AgentSession(e.to_string()))?;
            stdin
                .flush()
                .await
                .map_err(|e| DomainError::AgentSession(e.to_string()))?;
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(value)) => {
                if let Some(err) = value.get("error") {
                    return Err(DomainError::AgentSession(err.to_string()));
                }
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(DomainError::AgentSession(
                "app server dropped the response channel".to_string(),
            )),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(DomainError::AgentSession(format!(
                    "no response to {method} within {REQUEST_TIMEOUT:?}"
                )))
            }
        }
    }
}

async fn route_message(shared: &Shared, line: &str) -> DomainResult<()> {
    let value: Value = serde_json::from_str(line)?;

    // Response to an in-flight request.
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(tx) = shared.pending.lock().await.remove(&id) {
            let _ = tx.send(value);
        }
        return Ok(());
    }

    // Unsolicited notification.
    if value.get("method").and_then(Value::as_str) == Some("turn.completed") {
        let params: TurnCompletedParams =
            serde_json::from_value(value.get("params").cloned().unwrap_or(Value::Null))?;
        let result = match params.status.as_str() {
            "ok" => TurnResult::ok(params.message),
            _ => TurnResult::error(
                params
                    .error
                    .unwrap_or_else(|| "agent reported a failed turn".to_string()),
            ),
        };

        let key = (params.thread_id, params.turn_id);
        let mut events = shared.turn_events.lock().await;
        match events.remove(&key) {
            Some(TurnEvent::Waiting(tx)) => {
                let _ = tx.send(result);
            }
            // Completion arrived before anyone awaited it; keep it.
            Some(TurnEvent::Ready(_)) | None => {
                events.insert(key, TurnEvent::Ready(result));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl AgentSession for AppServerSession {
    async fn start_thread(&self, workdir: &Path, policy: SandboxPolicy) -> DomainResult<Uuid> {
        let sandbox = match policy {
            SandboxPolicy::WorkspaceWrite => "workspace_write",
            SandboxPolicy::ReadOnly => "read_only",
        };
        let result = self
            .request(
                "thread.start",
                json!({ "cwd": workdir.to_string_lossy(), "sandbox": sandbox }),
            )
            .await?;
        let thread_id = result
            .get("thread_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                DomainError::AgentSession("thread.start returned no thread id".to_string())
            })?;
        debug!(thread_id = %thread_id, "Agent thread started");
        Ok(thread_id)
    }

    async fn submit_turn(&self, thread_id: Uuid, prompt: &str) -> DomainResult<TurnHandle> {
        let result = self
            .request(
                "turn.submit",
                json!({ "thread_id": thread_id.to_string(), "input": prompt }),
            )
            .await?;
        let turn_id = result
            .get("turn_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                DomainError::AgentSession("turn.submit returned no turn id".to_string())
            })?;
        Ok(TurnHandle(turn_id))
    }

    async fn await_completion(
        &self,
        thread_id: Uuid,
        handle: TurnHandle,
        timeout: Duration,
    ) -> DomainResult<TurnResult> {
        let key = (thread_id, handle.0);
        let rx = {
            let mut events = self.shared.turn_events.lock().await;
            match events.remove(&key) {
                Some(TurnEvent::Ready(result)) => return Ok(result),
                Some(TurnEvent::Waiting(_)) => {
                    return Err(DomainError::AgentSession(
                        "turn is already being awaited".to_string(),
                    ));
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    events.insert(key, TurnEvent::Waiting(tx));
                    rx
                }
            }
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(DomainError::AgentSession(
                "app server dropped the turn channel".to_string(),
            )),
            Err(_) => {
                self.shared.turn_events.lock().await.remove(&key);
                warn!(thread_id = %thread_id, turn_id = %handle.0, "Turn timed out");
                Ok(TurnResult::timeout())
            }
        }
    }

    async fn stop(&self, thread_id: Uuid) -> DomainResult<()> {
        self.request("thread.stop", json!({ "thread_id": thread_id.to_string() }))
            .await?;
        Ok(())
    }
}
