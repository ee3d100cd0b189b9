//! Session execution seam.
//!
//! The scheduler never launches agents directly. It hands a
//! [`SessionRequest`] to a [`SessionExecutor`], which owns the workspace
//! for the lifetime of the session. Tests substitute their own executor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::fixture::prepare_workspace;
use crate::error::SessionError;
use crate::spec::Fixture;

/// Default agent command. The composed prompt is written to its stdin.
pub const DEFAULT_AGENT_COMMAND: &str = "claude -p";

/// Everything an executor needs to run one session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Identifier assigned by the scheduler at launch.
    pub session_id: String,
    pub variant_id: String,
    pub run_index: u32,
    /// Base prompt with the variant suffix already appended.
    pub prompt: String,
    pub fixture: Fixture,
    /// Directory the session works in. Created by the executor.
    pub workspace: PathBuf,
    /// Wall-clock budget for fixture preparation plus the agent itself.
    pub timeout: Duration,
}

/// What a session produced when it ran to completion.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl SessionOutcome {
    /// Combined transcript, stdout first.
    pub fn transcript(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n--- stderr ---\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs agent sessions.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    /// Prepares the workspace and runs the session to completion.
    ///
    /// Returning `Ok` means the session finished without error. The caller
    /// enforces the time budget and drops this future when it expires.
    async fn execute(&self, request: &SessionRequest) -> Result<SessionOutcome, SessionError>;

    /// Best-effort termination of a session that overran its budget.
    async fn stop(&self, _session_id: &str) {}
}

/// Executor that launches the agent as a shell command inside the workspace.
pub struct CommandSessionExecutor {
    command: String,
    shell: String,
    env_vars: Vec<(String, String)>,
    running: Mutex<HashMap<String, u32>>,
}

impl CommandSessionExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: "sh".to_string(),
            env_vars: Vec::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the shell used to interpret the command.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Adds an environment variable passed to every session.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn track(&self, session_id: &str, pid: Option<u32>) {
        if let (Some(pid), Ok(mut running)) = (pid, self.running.lock()) {
            running.insert(session_id.to_string(), pid);
        }
    }

    fn untrack(&self, session_id: &str) -> Option<u32> {
        self.running
            .lock()
            .ok()
            .and_then(|mut running| running.remove(session_id))
    }
}

impl Default for CommandSessionExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_COMMAND)
    }
}

#[async_trait]
impl SessionExecutor for CommandSessionExecutor {
    async fn execute(&self, request: &SessionRequest) -> Result<SessionOutcome, SessionError> {
        let start = Instant::now();

        prepare_workspace(&request.fixture, &request.workspace).await?;
        debug!(
            session_id = %request.session_id,
            workspace = %request.workspace.display(),
            "Workspace prepared"
        );

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&request.workspace)
            .env("EVAL_SESSION_ID", &request.session_id)
            .env("EVAL_VARIANT_ID", &request.variant_id)
            .env("EVAL_RUN_INDEX", request.run_index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        info!(
            session_id = %request.session_id,
            variant = %request.variant_id,
            run_index = request.run_index,
            "Launching agent: {}",
            self.command
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Launch(format!("Failed to spawn '{}': {}", self.command, e)))?;
        self.track(&request.session_id, child.id());

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.prompt.as_bytes()).await {
                self.untrack(&request.session_id);
                return Err(SessionError::Launch(format!("Failed to write prompt: {}", e)));
            }
            stdin.shutdown().await.ok();
        }

        let output = child.wait_with_output().await;
        self.untrack(&request.session_id);
        let output = output?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(SessionError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(SessionOutcome {
            stdout,
            stderr,
            duration: start.elapsed(),
        })
    }

    async fn stop(&self, session_id: &str) {
        let Some(pid) = self.untrack(session_id) else {
            return;
        };

        // The agent runs in its own process group; signal the whole group.
        let result = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", pid))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => {
                debug!(session_id = %session_id, pid = pid, "Stopped session process group")
            }
            Ok(_) => debug!(session_id = %session_id, pid = pid, "Session process group already gone"),
            Err(e) => warn!(session_id = %session_id, "Failed to stop session: {}", e),
        }
    }
}
