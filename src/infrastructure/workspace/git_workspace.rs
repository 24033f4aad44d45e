//! Git-backed workspace gateway.
//!
//! Each task gets an isolated clone of the source repository on its own
//! branch, provisioned under the workspaces directory. Commands run inside
//! a workspace go through an allow-list and a hard timeout; a process that
//! outlives the timeout is killed and reported with the `killed` flag, not
//! an error.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::{WorkspaceConfig, MAX_COMMAND_TIMEOUT_SECS};
use crate::domain::ports::{CommandOutput, Workspace};

/// Workspace gateway over local git clones.
pub struct GitWorkspace {
    config: WorkspaceConfig,
    paths: RwLock<HashMap<Uuid, PathBuf>>,
}

impl GitWorkspace {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            paths: RwLock::new(HashMap::new()),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs.min(MAX_COMMAND_TIMEOUT_SECS))
    }

    async fn path_for(&self, task_id: Uuid) -> DomainResult<PathBuf> {
        self.paths
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or_else(|| {
                DomainError::Workspace(format!("no workspace provisioned for task {task_id}"))
            })
    }

    /// Run a command, killing it at the timeout. Internal git plumbing uses
    /// this directly; externally submitted commands go through `run` and
    /// its allow-list first.
    async fn exec(&self, cwd: &PathBuf, argv: &[String]) -> DomainResult<CommandOutput> {
        let program = argv
            .first()
            .ok_or_else(|| DomainError::Workspace("empty command".to_string()))?;

        let child = Command::new(program)
            .args(&argv[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DomainError::Workspace(format!("failed to spawn {program}: {e}")))?;

        match tokio::time::timeout(self.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                killed: false,
            }),
            Ok(Err(e)) => Err(DomainError::Workspace(e.to_string())),
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop already
                // reaped it when the future was dropped by the timeout.
                warn!(command = %program, "Command killed at timeout");
                Ok(CommandOutput {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("killed after {:?}", self.timeout()),
                    killed: true,
                })
            }
        }
    }

    /// Run a git command that must succeed.
    async fn git(&self, cwd: &PathBuf, args: &[&str]) -> DomainResult<CommandOutput> {
        let argv: Vec<String> = std::iter::once("git".to_string())
            .chain(args.iter().map(ToString::to_string))
            .collect();
        let output = self.exec(cwd, &argv).await?;
        if !output.success() {
            return Err(DomainError::Workspace(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn provision(&self, task_id: Uuid, branch: &str) -> DomainResult<PathBuf> {
        let parent = PathBuf::from(&self.config.workspaces_dir);
        tokio::fs::create_dir_all(&parent).await?;
        let dir = parent.join(task_id.to_string());

        let dir_str = dir.to_string_lossy();
        self.git(
            &parent,
            &["clone", self.config.source_repo.as_str(), dir_str.as_ref()],
        )
        .await?;
        self.git(&dir, &["checkout", "-b", branch]).await?;

        self.paths.write().await.insert(task_id, dir.clone());
        info!(task_id = %task_id, branch = %branch, path = %dir.display(), "Workspace provisioned");
        Ok(dir)
    }

    async fn run(&self, task_id: Uuid, argv: &[String]) -> DomainResult<CommandOutput> {
        let program = argv
            .first()
            .ok_or_else(|| DomainError::Workspace("empty command".to_string()))?;
        if !self.config.allowed_commands.iter().any(|c| c == program) {
            return Err(DomainError::CommandNotAllowed(program.clone()));
        }
        let cwd = self.path_for(task_id).await?;
        debug!(task_id = %task_id, command = %argv.join(" "), "Running workspace command");
        self.exec(&cwd, argv).await
    }

    async fn changed_files(&self, task_id: Uuid) -> DomainResult<Vec<String>> {
        let cwd = self.path_for(task_id).await?;
        let output = self.git(&cwd, &["status", "--porcelain"]).await?;
        let mut files = Vec::new();
        for line in output.stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let path = &line[3..];
            // Renames are reported as "old -> new"; the new path is the
            // one that matters for guardrails.
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            files.push(path.trim().to_string());
        }
        Ok(files)
    }

    async fn diff(&self, task_id: Uuid) -> DomainResult<String> {
        let cwd = self.path_for(task_id).await?;
        let output = self.git(&cwd, &["diff", "HEAD"]).await?;
        Ok(output.stdout)
    }

    async fn diff_fingerprint(&self, task_id: Uuid) -> DomainResult<String> {
        // Hash the diff text plus the sorted change set, so adding an
        // untracked file changes the fingerprint even though it is absent
        // from the textual diff.
        let diff = self.diff(task_id).await?;
        let mut changed = self.changed_files(task_id).await?;
        changed.sort_unstable();

        let mut hasher = DefaultHasher::new();
        diff.hash(&mut hasher);
        changed.hash(&mut hasher);
        Ok(format!("{:016x}", hasher.finish()))
    }

    async fn commit_all(&self, task_id: Uuid, message: &str) -> DomainResult<String> {
        let cwd = self.path_for(task_id).await?;
        self.git(&cwd, &["add", "-A"]).await?;
        self.git(&cwd, &["commit", "-m", message]).await?;
        let output = self.git(&cwd, &["rev-parse", "HEAD"]).await?;
        let hash = output.stdout.trim().to_string();
        info!(task_id = %task_id, commit = %hash, "Changes committed");
        Ok(hash)
    }

    async fn push(&self, task_id: Uuid) -> DomainResult<()> {
        let cwd = self.path_for(task_id).await?;
        let branch = self.git(&cwd, &["branch", "--show-current"]).await?;
        self.git(&cwd, &["push", "-u", "origin", branch.stdout.trim()])
            .await?;
        Ok(())
    }

    async fn open_pull_request(
        &self,
        task_id: Uuid,
        title: &str,
        body: &str,
    ) -> DomainResult<String> {
        let cwd = self.path_for(task_id).await?;
        let argv: Vec<String> = ["gh", "pr", "create", "--title", title, "--body", body]
            .iter()
            .map(ToString::to_string)
            .collect();
        let output = self.exec(&cwd, &argv).await?;
        if !output.success() {
            return Err(DomainError::Workspace(format!(
                "gh pr create failed: {}",
                output.stderr.trim()
            )));
        }
        let url = output
            .stdout
            .lines()
            .rev()
            .find(|l| l.starts_with("http"))
            .unwrap_or("")
            .trim()
            .to_string();
        if url.is_empty() {
            return Err(DomainError::Workspace(
                "gh pr create returned no URL".to_string(),
            ));
        }
        info!(task_id = %task_id, pr_url = %url, "Pull request opened");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_with(paths: Vec<(Uuid, PathBuf)>) -> GitWorkspace {
        let map: HashMap<Uuid, PathBuf> = paths.into_iter().collect();
        GitWorkspace {
            config: WorkspaceConfig::default(),
            paths: RwLock::new(map),
        }
    }

    #[tokio::test]
    async fn test_disallowed_command_is_rejected() {
        let task_id = Uuid::new_v4();
        let ws = workspace_with(vec![(task_id, PathBuf::from("/tmp"))]);
        let err = ws
            .run(task_id, &["rm".to_string(), "-rf".to_string(), "/".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CommandNotAllowed(p) if p == "rm"));
    }

    #[tokio::test]
    async fn test_unprovisioned_task_has_no_workspace() {
        let ws = GitWorkspace::new(WorkspaceConfig::default());
        let err = ws
            .run(Uuid::new_v4(), &["git".to_string(), "status".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Workspace(_)));
    }

    #[tokio::test]
    async fn test_allowed_command_runs_and_reports_exit_code() {
        let task_id = Uuid::new_v4();
        let ws = workspace_with(vec![(task_id, PathBuf::from("/tmp"))]);
        // `git --version` works in any directory.
        let output = ws
            .run(task_id, &["git".to_string(), "--version".to_string()])
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("git version"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_flags() {
        let task_id = Uuid::new_v4();
        let mut allowed = WorkspaceConfig::default().allowed_commands;
        allowed.push("sleep".to_string());
        let config = WorkspaceConfig {
            command_timeout_secs: 1,
            allowed_commands: allowed,
            ..WorkspaceConfig::default()
        };
        let ws = GitWorkspace {
            config,
            paths: RwLock::new(
                vec![(task_id, PathBuf::from("/tmp"))].into_iter().collect(),
            ),
        };
        let output = ws
            .run(task_id, &["sleep".to_string(), "5".to_string()])
            .await
            .unwrap();
        assert!(output.killed);
        assert_eq!(output.exit_code, -1);
    }
}
