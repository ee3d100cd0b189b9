//! Score records and oracle response validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AttemptError, JudgeError};
use crate::utils::extract_json_object;

/// Lowest legal score.
pub const MIN_SCORE: u8 = 1;
/// Highest legal score.
pub const MAX_SCORE: u8 = 5;

/// Directory under `<runDir>/<sessionId>/` holding score files.
pub const SCORES_DIR: &str = "scores";

/// Rubric scores of one judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreValues {
    pub overall: u8,
    #[serde(default)]
    pub dimensions: BTreeMap<String, u8>,
}

/// One rubric judgment of one session. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub rubric: String,
    pub session_id: String,
    pub judged_at: DateTime<Utc>,
    /// Oracle model that produced the judgment.
    pub model: String,
    pub files_judged: Vec<String>,
    pub scores: ScoreValues,
    pub justification: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Judged from a forced collection of an unfinished session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl Score {
    /// Path of a rubric's score file inside a session directory.
    pub fn path_in(session_dir: &Path, rubric: &str) -> PathBuf {
        session_dir.join(SCORES_DIR).join(format!("{}.json", rubric))
    }

    /// Writes the score to `<session_dir>/scores/<rubric>.json`.
    pub fn save(&self, session_dir: &Path) -> Result<PathBuf, JudgeError> {
        let path = Self::path_in(session_dir, &self.rubric);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, JudgeError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Checks the range invariant on every score value.
    pub fn validate(&self) -> Result<(), AttemptError> {
        check_range("overall", self.scores.overall)?;
        for (name, value) in &self.scores.dimensions {
            check_range(name, *value)?;
        }
        Ok(())
    }
}

/// The parts of a score the oracle supplies.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub scores: ScoreValues,
    pub justification: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

/// Parses and validates an oracle response.
///
/// Accepts `overall`/`dimensions` at the top level or nested under
/// `scores`. Any shape or range problem is an [`AttemptError`], so the
/// caller retries it like a transport failure.
pub fn parse_verdict(text: &str) -> Result<Verdict, AttemptError> {
    let object = extract_json_object(text).map_err(|e| AttemptError::Malformed(e.to_string()))?;

    let scores_obj = match object.get("scores") {
        Some(Value::Object(nested)) => nested,
        _ => &object,
    };

    let overall = scores_obj
        .get("overall")
        .ok_or_else(|| AttemptError::Malformed("missing 'overall' score".to_string()))
        .and_then(|v| score_value("overall", v))?;

    let mut dimensions = BTreeMap::new();
    match scores_obj.get("dimensions") {
        None | Some(Value::Null) => {}
        Some(Value::Object(dims)) => {
            for (name, value) in dims {
                dimensions.insert(name.clone(), score_value(name, value)?);
            }
        }
        Some(other) => {
            return Err(AttemptError::Malformed(format!(
                "'dimensions' must be an object, got {}",
                type_name(other)
            )))
        }
    }

    Ok(Verdict {
        scores: ScoreValues {
            overall,
            dimensions,
        },
        justification: string_field(&object, "justification")?,
        strengths: string_list(&object, "strengths")?,
        weaknesses: string_list(&object, "weaknesses")?,
    })
}

fn score_value(name: &str, value: &Value) -> Result<u8, AttemptError> {
    let number = value.as_f64().ok_or_else(|| {
        AttemptError::Malformed(format!("'{}' must be a number, got {}", name, type_name(value)))
    })?;
    if number.fract() != 0.0 {
        return Err(AttemptError::OutOfRange(format!(
            "'{}' = {} is not an integer",
            name, number
        )));
    }
    if number < MIN_SCORE as f64 || number > MAX_SCORE as f64 {
        return Err(AttemptError::OutOfRange(format!(
            "'{}' = {} is outside {}..={}",
            name, number, MIN_SCORE, MAX_SCORE
        )));
    }
    Ok(number as u8)
}

fn check_range(name: &str, value: u8) -> Result<(), AttemptError> {
    if (MIN_SCORE..=MAX_SCORE).contains(&value) {
        Ok(())
    } else {
        Err(AttemptError::OutOfRange(format!(
            "'{}' = {} is outside {}..={}",
            name, value, MIN_SCORE, MAX_SCORE
        )))
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Result<String, AttemptError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AttemptError::Malformed(format!(
            "'{}' must be a string, got {}",
            key,
            type_name(other)
        ))),
    }
}

fn string_list(object: &Map<String, Value>, key: &str) -> Result<Vec<String>, AttemptError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(AttemptError::Malformed(format!(
                    "'{}' entries must be strings, got {}",
                    key,
                    type_name(other)
                ))),
            })
            .collect(),
        Some(other) => Err(AttemptError::Malformed(format!(
            "'{}' must be a list, got {}",
            key,
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
