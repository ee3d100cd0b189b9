//! Run manifest (`sessions.json`).
//!
//! The manifest echoes the spec, its weight tables and every session run
//! record. [`ManifestWriter`] rewrites it atomically on every state
//! transition so an interrupted run still leaves a manifest describing
//! whatever had finished.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::job::{SessionRun, SessionStatus, WorkItem};
use crate::error::SchedulerError;
use crate::spec::EvalSpec;

/// File name of the manifest inside a run directory.
pub const MANIFEST_FILE: &str = "sessions.json";

/// One row of a weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub weight: f64,
    /// Rubric stem, for metric weights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,
}

/// Persisted description of a scheduler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub spec: EvalSpec,
    pub spec_digest: String,
    pub binary_check_weights: Vec<WeightEntry>,
    pub metric_weights: Vec<WeightEntry>,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// One record per work item, in enumeration order.
    pub sessions: Vec<SessionRun>,
}

impl RunManifest {
    /// Creates a manifest with every item pending.
    pub fn new(spec: &EvalSpec, items: &[WorkItem], concurrency: usize, timeout: Duration) -> Self {
        let binary_check_weights = spec
            .binary_checks
            .iter()
            .map(|c| WeightEntry {
                name: c.name.clone(),
                weight: c.weight,
                rubric: None,
            })
            .collect();
        let metric_weights = spec
            .metrics
            .iter()
            .map(|m| WeightEntry {
                name: m.name.clone(),
                weight: m.weight,
                rubric: Some(EvalSpec::rubric_stem(m)),
            })
            .collect();

        Self {
            spec: spec.clone(),
            spec_digest: spec.digest(),
            binary_check_weights,
            metric_weights,
            concurrency,
            timeout_secs: timeout.as_secs(),
            started_at: Utc::now(),
            finished_at: None,
            sessions: items.iter().map(SessionRun::pending).collect(),
        }
    }

    /// Path of the manifest inside `run_dir`.
    pub fn path_in(run_dir: &Path) -> PathBuf {
        run_dir.join(MANIFEST_FILE)
    }

    /// Reads the manifest of `run_dir`.
    pub fn load(run_dir: &Path) -> Result<Self, SchedulerError> {
        let path = Self::path_in(run_dir);
        let content = fs::read_to_string(&path).map_err(|e| SchedulerError::ManifestRead {
            path: path.clone(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| SchedulerError::ManifestRead {
            path,
            message: e.to_string(),
        })
    }

    /// Writes the manifest atomically (temp file + rename).
    pub fn save(&self, run_dir: &Path) -> Result<(), SchedulerError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SchedulerError::Manifest(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(run_dir)
            .map_err(|e| SchedulerError::Manifest(e.to_string()))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.flush())
            .map_err(|e| SchedulerError::Manifest(e.to_string()))?;
        tmp.persist(Self::path_in(run_dir))
            .map_err(|e| SchedulerError::Manifest(e.to_string()))?;
        Ok(())
    }

    /// Looks up a session record by its session id.
    pub fn session(&self, session_id: &str) -> Option<&SessionRun> {
        self.sessions
            .iter()
            .find(|s| s.session_id.as_deref() == Some(session_id))
    }

    /// Counts sessions per status.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.sessions.len(),
            ..Default::default()
        };
        for session in &self.sessions {
            match session.status {
                SessionStatus::Completed => summary.completed += 1,
                SessionStatus::Failed => summary.failed += 1,
                SessionStatus::TimedOut => summary.timed_out += 1,
                SessionStatus::Pending | SessionStatus::Running => summary.unfinished += 1,
            }
        }
        summary
    }
}

/// Session counts reported after every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Items that never reached a terminal state.
    pub unfinished: usize,
}

impl RunSummary {
    /// Process exit code for this outcome. Timeouts take precedence.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out > 0 {
            124
        } else if self.failed > 0 || self.unfinished > 0 {
            1
        } else {
            0
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sessions: {} completed, {} failed, {} timed out",
            self.total, self.completed, self.failed, self.timed_out
        )?;
        if self.unfinished > 0 {
            write!(f, ", {} unfinished", self.unfinished)?;
        }
        Ok(())
    }
}

/// Serializes manifest updates from concurrent workers.
pub struct ManifestWriter {
    run_dir: PathBuf,
    manifest: Mutex<RunManifest>,
}

impl ManifestWriter {
    pub fn new(run_dir: impl Into<PathBuf>, manifest: RunManifest) -> Self {
        Self {
            run_dir: run_dir.into(),
            manifest: Mutex::new(manifest),
        }
    }

    /// Applies `f` to the record at `position` and persists the manifest.
    ///
    /// Returns whatever `f` returns.
    pub async fn update<R>(
        &self,
        position: usize,
        f: impl FnOnce(&mut SessionRun) -> R,
    ) -> Result<R, SchedulerError> {
        let mut manifest = self.manifest.lock().await;
        let run = manifest.sessions.get_mut(position).ok_or_else(|| {
            SchedulerError::Manifest(format!("No session record at position {}", position))
        })?;
        let result = f(run);
        manifest.save(&self.run_dir)?;
        debug!(position = position, "Manifest updated");
        Ok(result)
    }

    /// Persists the current state without modifying it.
    pub async fn flush(&self) -> Result<(), SchedulerError> {
        self.manifest.lock().await.save(&self.run_dir)
    }

    /// Stamps the finish time, persists, and returns the final manifest.
    pub async fn finish(&self) -> Result<RunManifest, SchedulerError> {
        let mut manifest = self.manifest.lock().await;
        manifest.finished_at = Some(Utc::now());
        manifest.save(&self.run_dir)?;
        Ok(manifest.clone())
    }

    /// Returns a copy of the current manifest.
    pub async fn snapshot(&self) -> RunManifest {
        self.manifest.lock().await.clone()
    }
}
