//! Error types for eval-forge operations.
//!
//! Defines the error taxonomy for every stage of an evaluation run:
//! - Eval spec loading and validation
//! - Session execution (external agent collaborator)
//! - Scheduling and manifest persistence
//! - Artifact collection
//! - Judge oracle interactions and scoring
//! - Aggregation of persisted results

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single defect found while validating an eval spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecViolation {
    /// Dotted path of the offending field (e.g. `fixture.repo`, `variants[1].id`).
    pub field: String,
    /// Human-readable description of the defect.
    pub message: String,
}

impl SpecViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors produced while loading or validating an eval spec.
///
/// Always fatal: nothing is scheduled once one of these is returned.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Failed to read eval spec '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse eval spec '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Eval spec is invalid ({} violation(s)):\n{}", .0.len(), format_violations(.0))]
    Invalid(Vec<SpecViolation>),
}

impl SpecError {
    /// Returns the violations carried by an `Invalid` error, or an empty slice.
    pub fn violations(&self) -> &[SpecViolation] {
        match self {
            SpecError::Invalid(violations) => violations,
            _ => &[],
        }
    }
}

fn format_violations(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised by the session-execution collaborator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to prepare fixture: {0}")]
    Fixture(String),

    #[error("Failed to launch session: {0}")]
    Launch(String),

    #[error("Session process exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a scheduler run as a whole.
///
/// Per-item failures never surface here; they are recorded on the item.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write run manifest: {0}")]
    Manifest(String),

    #[error("Failed to read run manifest '{path}': {message}")]
    ManifestRead { path: PathBuf, message: String },

    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Errors that can occur while collecting session artifacts.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Session '{session_id}' is {status}, not completed (use force to collect anyway)")]
    IncompleteSession { session_id: String, status: String },

    #[error("Session workspace not found: {0}")]
    MissingWorkspace(PathBuf),

    #[error("Invalid collect pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Failed to walk workspace: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when interacting with a judge oracle.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Oracle command failed: {0}")]
    CommandFailed(String),

    #[error("Oracle command timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while judging a session against a rubric.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Rubric '{0}' not found")]
    RubricNotFound(PathBuf),

    #[error("Failed to render judge prompt: {0}")]
    Template(#[from] tera::Error),

    #[error("Judge gave up on rubric '{rubric}' after {attempts} attempt(s): {last}")]
    Exhausted {
        rubric: String,
        attempts: u32,
        last: String,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single oracle attempt. Every variant is retryable.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("oracle transport error: {0}")]
    Transport(#[from] LlmError),

    #[error("malformed oracle response: {0}")]
    Malformed(String),

    #[error("score out of range: {0}")]
    OutOfRange(String),
}

/// Errors that can occur while aggregating a run directory.
///
/// Missing or insufficient score data is never an error; only an unreadable
/// manifest is.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Run manifest not found at '{0}'")]
    MissingManifest(PathBuf),

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
