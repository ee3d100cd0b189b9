//! Artifact extraction from session workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::diagnostics::Diagnostics;
use crate::error::CollectionError;
use crate::scheduler::{SessionRun, SessionStatus};

/// Directory under `<runDir>/<sessionId>/` that receives collected files.
pub const ARTIFACTS_DIR: &str = "workspace";

/// Sidecar describing a collection, stored next to the artifacts directory.
pub const SIDECAR_FILE: &str = "collected.json";

/// Directories never descended into while collecting.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", ".venv", "target"];

/// Result of collecting one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedArtifacts {
    pub session_id: String,
    /// Workspace the files were copied from.
    pub source: PathBuf,
    /// Directory the files were copied into.
    pub dir: PathBuf,
    /// Relative paths of every collected file, sorted.
    pub files: Vec<String>,
    pub patterns: Vec<String>,
    /// Set when collection was forced on a session that did not complete.
    pub partial: bool,
    pub collected_at: DateTime<Utc>,
}

impl CollectedArtifacts {
    /// Reads the sidecar written for a session directory.
    pub fn load(session_dir: &Path) -> Result<Self, CollectionError> {
        let content = fs::read_to_string(session_dir.join(SIDECAR_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Absolute paths of the collected files, in `files` order.
    pub fn paths(&self) -> impl Iterator<Item = (String, PathBuf)> + '_ {
        self.files.iter().map(|f| (f.clone(), self.dir.join(f)))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Copies files matching a set of glob patterns out of session workspaces.
#[derive(Debug, Clone)]
pub struct ResultsCollector {
    patterns: Vec<String>,
    matcher: GlobSet,
    diagnostics: Diagnostics,
}

impl ResultsCollector {
    pub fn new(patterns: &[String], diagnostics: Diagnostics) -> Result<Self, CollectionError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| CollectionError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let matcher = builder.build().map_err(|e| CollectionError::Pattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;

        Ok(Self {
            patterns: patterns.to_vec(),
            matcher,
            diagnostics,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Copies every matching file of `workspace` into `output_dir`,
    /// preserving relative paths.
    ///
    /// A session that is not `completed` is refused unless `force` is set,
    /// in which case the result is flagged `partial`. Any previous contents
    /// of `output_dir` are replaced.
    pub fn collect(
        &self,
        session_id: &str,
        workspace: &Path,
        status: SessionStatus,
        output_dir: &Path,
        force: bool,
    ) -> Result<CollectedArtifacts, CollectionError> {
        let partial = status != SessionStatus::Completed;
        if partial && !force {
            return Err(CollectionError::IncompleteSession {
                session_id: session_id.to_string(),
                status: status.to_string(),
            });
        }
        if !workspace.is_dir() {
            return Err(CollectionError::MissingWorkspace(workspace.to_path_buf()));
        }

        if output_dir.exists() {
            fs::remove_dir_all(output_dir)?;
        }
        fs::create_dir_all(output_dir)?;

        let walker = WalkDir::new(workspace)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && IGNORED_DIRS
                            .iter()
                            .any(|d| entry.file_name() == std::ffi::OsStr::new(d)))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(workspace) else {
                continue;
            };
            if !self.matcher.is_match(relative) {
                continue;
            }

            let target = output_dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
        files.sort();

        if files.is_empty() {
            self.diagnostics.warn(
                "collector",
                format!(
                    "No files in {} matched {:?}",
                    workspace.display(),
                    self.patterns
                ),
            );
        }
        if partial {
            self.diagnostics.warn(
                "collector",
                format!(
                    "Session {} is {}; collected {} file(s) as partial",
                    session_id,
                    status,
                    files.len()
                ),
            );
        }

        let artifacts = CollectedArtifacts {
            session_id: session_id.to_string(),
            source: workspace.to_path_buf(),
            dir: output_dir.to_path_buf(),
            files,
            patterns: self.patterns.clone(),
            partial,
            collected_at: Utc::now(),
        };

        let sidecar_dir = output_dir.parent().unwrap_or(output_dir);
        fs::write(
            sidecar_dir.join(SIDECAR_FILE),
            serde_json::to_vec_pretty(&artifacts)?,
        )?;

        info!(
            session_id = %session_id,
            files = artifacts.files.len(),
            partial = partial,
            "Collected artifacts"
        );
        Ok(artifacts)
    }

    /// Collects a manifest session into `<run_dir>/<sessionId>/workspace`.
    pub fn collect_session(
        &self,
        session: &SessionRun,
        run_dir: &Path,
        force: bool,
    ) -> Result<CollectedArtifacts, CollectionError> {
        let session_id = session.session_id.as_deref().ok_or_else(|| {
            CollectionError::IncompleteSession {
                session_id: format!("{}#{}", session.variant_id, session.run_index),
                status: session.status.to_string(),
            }
        })?;
        let workspace = session
            .workspace_path
            .clone()
            .unwrap_or_else(|| run_dir.join(session_id));

        debug!(session_id = %session_id, workspace = %workspace.display(), "Collecting session");
        self.collect(
            session_id,
            &workspace,
            session.status,
            &run_dir.join(session_id).join(ARTIFACTS_DIR),
            force,
        )
    }
}
