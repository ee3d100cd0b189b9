//! Rubric files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::JudgeError;
use crate::spec::{EvalSpec, Metric, RUBRIC_EXTENSION};

/// A loaded rubric: its scoring-scale text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    /// File stem, used as the score file name.
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

impl Rubric {
    /// Loads a rubric file directly.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, JudgeError> {
        let path = path.into();
        let content =
            fs::read_to_string(&path).map_err(|_| JudgeError::RubricNotFound(path.clone()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(RUBRIC_EXTENSION)
            .unwrap_or(&file_name)
            .to_string();

        Ok(Self {
            name,
            path,
            content,
        })
    }

    /// Loads the rubric a metric refers to, relative to `rubrics_dir`.
    pub fn for_metric(metric: &Metric, rubrics_dir: &Path) -> Result<Self, JudgeError> {
        let mut rubric = Self::from_file(rubrics_dir.join(&metric.rubric))?;
        rubric.name = EvalSpec::rubric_stem(metric);
        Ok(rubric)
    }
}

/// Loads every rubric named by the spec's metrics, in metric order.
pub fn load_all(spec: &EvalSpec, rubrics_dir: &Path) -> Result<Vec<Rubric>, JudgeError> {
    spec.metrics
        .iter()
        .map(|metric| Rubric::for_metric(metric, rubrics_dir))
        .collect()
}
