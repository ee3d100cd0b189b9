//! Reads a finished run directory back into memory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::error::AggregateError;
use crate::judge::{Score, SCORES_DIR};
use crate::scheduler::RunManifest;

/// Manifest plus every valid score file of a run.
#[derive(Debug, Clone)]
pub struct RunData {
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
    /// Scores in manifest session order, then by rubric file name.
    pub scores: Vec<Score>,
}

/// Loads `<run_dir>/sessions.json` and `<run_dir>/<sessionId>/scores/*.json`.
///
/// Only a missing or unreadable manifest is an error. Score files that do
/// not parse, or that break the 1..=5 range, are skipped with a warning.
pub fn load_run(run_dir: &Path, diagnostics: &Diagnostics) -> Result<RunData, AggregateError> {
    let manifest_path = RunManifest::path_in(run_dir);
    if !manifest_path.exists() {
        return Err(AggregateError::MissingManifest(manifest_path));
    }
    let manifest = RunManifest::load(run_dir).map_err(|e| AggregateError::Parse {
        path: manifest_path,
        message: e.to_string(),
    })?;

    let mut scores = Vec::new();
    for session in &manifest.sessions {
        let Some(session_id) = session.session_id.as_deref() else {
            continue;
        };
        let scores_dir = run_dir.join(session_id).join(SCORES_DIR);
        if !scores_dir.is_dir() {
            continue;
        }

        for path in score_files(&scores_dir)? {
            let mut score = match Score::load(&path) {
                Ok(score) => score,
                Err(e) => {
                    diagnostics.warn(
                        "aggregate",
                        format!("Skipping unreadable score file '{}': {}", path.display(), e),
                    );
                    continue;
                }
            };
            if let Err(e) = score.validate() {
                diagnostics.warn(
                    "aggregate",
                    format!("Skipping invalid score file '{}': {}", path.display(), e),
                );
                continue;
            }
            if score.session_id != session_id {
                diagnostics.warn(
                    "aggregate",
                    format!(
                        "Score '{}' names session {} but is stored under {}; using {}",
                        path.display(),
                        score.session_id,
                        session_id,
                        session_id
                    ),
                );
                score.session_id = session_id.to_string();
            }
            scores.push(score);
        }
    }

    debug!(
        run_dir = %run_dir.display(),
        sessions = manifest.sessions.len(),
        scores = scores.len(),
        "Loaded run"
    );

    Ok(RunData {
        run_dir: run_dir.to_path_buf(),
        manifest,
        scores,
    })
}

fn score_files(dir: &Path) -> Result<Vec<PathBuf>, AggregateError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::ScoreValues;
    use crate::scheduler::{enumerate, SessionStatus};
    use crate::spec::types::fixtures::sample_spec;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn score(rubric: &str, session_id: &str, overall: u8) -> Score {
        Score {
            rubric: rubric.to_string(),
            session_id: session_id.to_string(),
            judged_at: Utc::now(),
            model: "m".to_string(),
            files_judged: vec![],
            scores: ScoreValues {
                overall,
                dimensions: BTreeMap::new(),
            },
            justification: String::new(),
            strengths: vec![],
            weaknesses: vec![],
            partial: false,
        }
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = load_run(temp.path(), &Diagnostics::new()).unwrap_err();
        assert!(matches!(err, AggregateError::MissingManifest(_)));
    }

    #[test]
    fn test_loads_scores_and_skips_bad_files() {
        let temp = TempDir::new().unwrap();
        let spec = sample_spec();
        let mut manifest =
            RunManifest::new(&spec, &enumerate(&spec), 2, Duration::from_secs(60));
        manifest.sessions[0].session_id = Some("s0".to_string());
        manifest.sessions[0].status = SessionStatus::Completed;
        manifest.save(temp.path()).unwrap();

        let session_dir = temp.path().join("s0");
        score("code-quality", "s0", 4).save(&session_dir).unwrap();
        score("ux", "s0", 2).save(&session_dir).unwrap();
        fs::write(session_dir.join("scores/broken.json"), "{not json").unwrap();
        let mut bad = score("bad", "s0", 3);
        bad.scores.overall = 9;
        bad.save(&session_dir).unwrap();

        let diagnostics = Diagnostics::new();
        let data = load_run(temp.path(), &diagnostics).unwrap();

        let rubrics: Vec<_> = data.scores.iter().map(|s| s.rubric.as_str()).collect();
        assert_eq!(rubrics, vec!["code-quality", "ux"]);
        assert_eq!(diagnostics.messages_for("aggregate").len(), 2);
    }
}
