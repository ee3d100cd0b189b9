//! Run aggregation and comparison reports.
//!
//! Reads `sessions.json` and every `<sessionId>/scores/*.json` of a run
//! directory, groups overall scores by variant and rubric, and compares
//! every unordered pair of variants with Welch's t-test. Pairwise p-values
//! are reported as is, without multiple-comparison correction.
//!
//! Aggregation never fails on missing or thin data: empty groups have a
//! `null` mean and pairs with fewer than two observations on either side
//! are annotated instead of tested. The output carries no timestamps, so
//! re-running over the same run directory reproduces it exactly.

pub mod loader;
pub mod markdown;
pub mod report;
pub mod stats;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::diagnostics::Diagnostics;
use crate::error::AggregateError;

pub use loader::{load_run, RunData};
pub use markdown::render_markdown;
pub use report::{
    aggregate, AggregateReport, CheckPassRate, PairwiseComparison, RawScore, RubricComparison,
    RubricStats, VariantPassRate, VariantSummary, COMPOSITE_RUBRIC, INSUFFICIENT_SAMPLE,
};
pub use stats::{welch_t_test, Descriptive, WelchTest};

/// Default Markdown report name inside the run directory.
pub const REPORT_MARKDOWN: &str = "report.md";
/// Default JSON report name inside the run directory.
pub const REPORT_JSON: &str = "report.json";

/// Which report documents to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
    Both,
}

/// Options for [`aggregate_run`].
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Report path. With [`ReportFormat::Both`] its extension is replaced by
    /// `.md` and `.json`.
    pub output: Option<PathBuf>,
    pub format: ReportFormat,
    /// Overrides the spec's significance threshold.
    pub significance: Option<f64>,
}

impl AggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_significance(mut self, threshold: f64) -> Self {
        self.significance = Some(threshold);
        self
    }

    /// Paths of the Markdown and JSON documents to write.
    pub fn report_paths(&self, run_dir: &Path) -> (Option<PathBuf>, Option<PathBuf>) {
        let markdown = |p: &PathBuf| p.with_extension("md");
        let json = |p: &PathBuf| p.with_extension("json");
        match (self.format, &self.output) {
            (ReportFormat::Markdown, Some(out)) => (Some(out.clone()), None),
            (ReportFormat::Json, Some(out)) => (None, Some(out.clone())),
            (ReportFormat::Both, Some(out)) => (Some(markdown(out)), Some(json(out))),
            (ReportFormat::Markdown, None) => (Some(run_dir.join(REPORT_MARKDOWN)), None),
            (ReportFormat::Json, None) => (None, Some(run_dir.join(REPORT_JSON))),
            (ReportFormat::Both, None) => (
                Some(run_dir.join(REPORT_MARKDOWN)),
                Some(run_dir.join(REPORT_JSON)),
            ),
        }
    }
}

/// Result of [`aggregate_run`].
#[derive(Debug, Clone)]
pub struct AggregateOutput {
    pub report: AggregateReport,
    /// Every document written, Markdown first.
    pub written: Vec<PathBuf>,
}

/// Aggregates a run directory and writes the requested report documents.
pub fn aggregate_run(
    run_dir: &Path,
    options: &AggregateOptions,
    diagnostics: &Diagnostics,
) -> Result<AggregateOutput, AggregateError> {
    let data = load_run(run_dir, diagnostics)?;

    let mut acceptance = data.manifest.spec.acceptance.clone();
    if let Some(threshold) = options.significance {
        acceptance.significance_threshold = threshold;
    }

    let report = aggregate(&data.manifest, &data.scores, &acceptance);
    for note in &report.notes {
        diagnostics.warn("aggregate", note.clone());
    }

    let (markdown_path, json_path) = options.report_paths(run_dir);
    let mut written = Vec::new();
    if let Some(path) = markdown_path {
        write_file(&path, render_markdown(&report).as_bytes())?;
        written.push(path);
    }
    if let Some(path) = json_path {
        let json = serde_json::to_vec_pretty(&report).map_err(|e| AggregateError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_file(&path, &json)?;
        written.push(path);
    }

    info!(
        run_dir = %run_dir.display(),
        scores = report.raw_scores.len(),
        reports = written.len(),
        "Aggregated run"
    );

    Ok(AggregateOutput { report, written })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), AggregateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_paths() {
        let run = Path::new("/runs/r1");
        assert_eq!(
            AggregateOptions::new().report_paths(run),
            (Some(run.join("report.md")), None)
        );
        assert_eq!(
            AggregateOptions::new()
                .with_format(ReportFormat::Both)
                .report_paths(run),
            (Some(run.join("report.md")), Some(run.join("report.json")))
        );
        assert_eq!(
            AggregateOptions::new()
                .with_format(ReportFormat::Both)
                .with_output("/tmp/cmp.txt")
                .report_paths(run),
            (
                Some(PathBuf::from("/tmp/cmp.md")),
                Some(PathBuf::from("/tmp/cmp.json"))
            )
        );
        assert_eq!(
            AggregateOptions::new()
                .with_format(ReportFormat::Json)
                .with_output("/tmp/out.json")
                .report_paths(run),
            (None, Some(PathBuf::from("/tmp/out.json")))
        );
    }
}
