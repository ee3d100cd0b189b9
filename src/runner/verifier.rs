//! Binary check execution.
//!
//! Each check template is rendered against a workspace path and run as a
//! shell command. Exit status zero is a pass; anything else, including a
//! failure to launch the check, is a fail.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::spec::BinaryCheck;

/// Placeholder replaced with the workspace path in every check template.
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";

/// Outcome of one binary check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Stdout followed by stderr, verbatim.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl CheckResult {
    /// Creates a passed check result.
    pub fn pass(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            output: output.into(),
            exit_code: Some(0),
        }
    }

    /// Creates a failed check result.
    pub fn fail(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            output: output.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }
}

/// Results of running a spec's checks against one workspace.
#[derive(Debug, Clone, Default)]
pub struct CheckRun {
    pub results: Vec<CheckResult>,
    /// The deadline expired before every check finished.
    pub timed_out: bool,
}

/// Substitutes every `{workspace}` occurrence with `workspace`.
///
/// Templates without the placeholder are returned unchanged.
pub fn render_check(template: &str, workspace: &Path) -> String {
    template.replace(WORKSPACE_PLACEHOLDER, &workspace.to_string_lossy())
}

/// Runs binary checks sequentially in spec order.
#[derive(Debug, Clone)]
pub struct CheckRunner {
    shell: String,
}

impl CheckRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Runs one check against `workspace`.
    pub async fn run_check(&self, check: &BinaryCheck, workspace: &Path) -> CheckResult {
        let command = render_check(&check.check_template, workspace);
        debug!(check = %check.name, "Running check: {}", command);

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let result = if output.status.success() {
                    CheckResult::pass(&check.name, text)
                } else {
                    CheckResult::fail(&check.name, text)
                };
                result.with_exit_code(output.status.code())
            }
            Err(e) => CheckResult::fail(&check.name, format!("Failed to execute check: {}", e)),
        }
    }

    /// Runs every check in order, stopping at `deadline` if one is given.
    ///
    /// A check still running when the deadline passes is recorded as failed
    /// and the remaining checks are skipped.
    pub async fn run_all(
        &self,
        checks: &[BinaryCheck],
        workspace: &Path,
        deadline: Option<tokio::time::Instant>,
    ) -> CheckRun {
        let start = Instant::now();
        let mut run = CheckRun::default();

        for check in checks {
            let result = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.run_check(check, workspace)).await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(check = %check.name, "Check exceeded the session time budget");
                            run.results.push(CheckResult::fail(
                                &check.name,
                                "Check exceeded the session time budget",
                            ));
                            run.timed_out = true;
                            break;
                        }
                    }
                }
                None => self.run_check(check, workspace).await,
            };
            run.results.push(result);
        }

        let passed = run.results.iter().filter(|r| r.passed).count();
        info!(
            "{}/{} checks passed in {:?}",
            passed,
            checks.len(),
            start.elapsed()
        );
        run
    }
}

impl Default for CheckRunner {
    fn default() -> Self {
        Self::new()
    }
}
