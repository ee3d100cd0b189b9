//! Work items and session run records.
//!
//! - `WorkItem`: one `(variant, run index)` pair to execute
//! - `SessionRun`: the mutable record of that item as it progresses
//! - `SessionStatus`: lifecycle state of a session run

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::CheckResult;
use crate::spec::EvalSpec;

/// One unit of work: a single run of a single variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub variant_id: String,
    pub run_index: u32,
    /// Index of this item in enumeration order.
    pub position: usize,
}

/// Enumerates every work item of `spec`: variant order first, then run index.
pub fn enumerate(spec: &EvalSpec) -> Vec<WorkItem> {
    spec.variants
        .iter()
        .flat_map(|variant| (0..spec.runs_per_variant).map(move |run| (variant.id.clone(), run)))
        .enumerate()
        .map(|(position, (variant_id, run_index))| WorkItem {
            variant_id,
            run_index,
            position,
        })
        .collect()
}

/// Lifecycle state of a session run.
///
/// `pending → running → {completed | failed | timedOut}`. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Pending,
    Running,
    /// The session finished without error. Binary check outcomes do not
    /// affect this.
    Completed,
    /// The session process itself errored.
    Failed,
    /// The session exceeded its time budget.
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::TimedOut
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Running) => true,
            // An item that never launched can still be abandoned.
            (SessionStatus::Pending, SessionStatus::Failed) => true,
            (SessionStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::TimedOut => "timedOut",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one session run, persisted in the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRun {
    pub variant_id: String,
    pub run_index: u32,
    /// Assigned when the session launches.
    #[serde(default)]
    pub session_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    /// Populated once the run reaches a terminal state.
    #[serde(default)]
    pub binary_check_results: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionRun {
    /// Creates the pending record for a work item.
    pub fn pending(item: &WorkItem) -> Self {
        Self {
            variant_id: item.variant_id.clone(),
            run_index: item.run_index,
            session_id: None,
            status: SessionStatus::Pending,
            workspace_path: None,
            binary_check_results: Vec::new(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Marks the run as launched. Returns false if the transition is illegal.
    pub fn start(&mut self, session_id: impl Into<String>, workspace: PathBuf) -> bool {
        if !self.status.can_transition_to(SessionStatus::Running) {
            return false;
        }
        self.session_id = Some(session_id.into());
        self.workspace_path = Some(workspace);
        self.status = SessionStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Moves the run to a terminal state. Returns false if the transition is
    /// illegal, leaving the record untouched.
    pub fn finish(
        &mut self,
        status: SessionStatus,
        checks: Vec<CheckResult>,
        error: Option<String>,
    ) -> bool {
        if !status.is_terminal() || !self.status.can_transition_to(status) {
            return false;
        }
        let now = Utc::now();
        self.status = status;
        self.binary_check_results = checks;
        self.error = error;
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
        self.finished_at = Some(now);
        true
    }

    /// Whether the run has check results that count toward pass rates.
    pub fn has_check_results(&self) -> bool {
        !self.binary_check_results.is_empty()
    }
}
