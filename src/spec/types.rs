//! Typed eval spec model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File extension every rubric reference must carry.
pub const RUBRIC_EXTENSION: &str = ".md";

/// Report row holding the metric-weighted composite score. No rubric may
/// use it as its stem.
pub const COMPOSITE_RUBRIC: &str = "overall";

/// Score file stem for a rubric path (`rubrics/ux.md` → `ux`).
pub fn rubric_file_stem(rubric: &str) -> String {
    let file = rubric.rsplit('/').next().unwrap_or(rubric);
    file.strip_suffix(RUBRIC_EXTENSION).unwrap_or(file).to_string()
}

/// Artifact patterns collected when a spec does not set `collect`.
pub const DEFAULT_COLLECT_PATTERNS: &[&str] = &[
    "**/*.py", "**/*.rs", "**/*.go", "**/*.js", "**/*.jsx", "**/*.ts", "**/*.tsx", "**/*.java",
    "**/*.rb", "**/*.c", "**/*.h", "**/*.cpp", "**/*.sh", "**/*.html", "**/*.css", "**/*.md",
];

/// A validated evaluation spec. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fixture: Fixture,
    /// Base instruction shared by all variants.
    pub prompt: String,
    pub variants: Vec<Variant>,
    pub runs_per_variant: u32,
    pub binary_checks: Vec<BinaryCheck>,
    pub metrics: Vec<Metric>,
    pub acceptance: Acceptance,
    /// Glob patterns selecting the files handed to the judge.
    pub collect: Vec<String>,
}

impl EvalSpec {
    /// Returns the full prompt a session of `variant` receives.
    pub fn composed_prompt(&self, variant: &Variant) -> String {
        format!("{}{}", self.prompt, variant.suffix)
    }

    /// Looks up a variant by id.
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Number of work items a run of this spec enumerates.
    pub fn total_sessions(&self) -> usize {
        self.variants.len() * self.runs_per_variant as usize
    }

    /// Whether the spec has enough runs per variant for significance testing.
    pub fn supports_significance(&self) -> bool {
        self.runs_per_variant >= 2
    }

    /// Rubric stem (file name without extension) for a metric.
    pub fn rubric_stem(metric: &Metric) -> String {
        rubric_file_stem(&metric.rubric)
    }

    /// SHA-256 digest of the canonical JSON form of this spec.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// Starting workspace state for every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    /// Local directory or git URL.
    pub repo: String,
    /// Sub-directory of `repo` to use as the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Git ref to check out after cloning.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

/// One treatment being compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    /// Appended verbatim to the base prompt.
    pub suffix: String,
}

/// An objective pass/fail check run against a session workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryCheck {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shell command; every `{workspace}` is replaced with the workspace path.
    pub check_template: String,
    pub weight: f64,
}

/// A rubric-scored quality metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Rubric file reference, relative to the rubrics directory.
    pub rubric: String,
    pub weight: f64,
}

/// Thresholds used to decide whether a treatment effect is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    pub minimum_mean_difference: f64,
    pub significance_threshold: f64,
    pub binary_pass_threshold: f64,
}

impl Default for Acceptance {
    fn default() -> Self {
        Self {
            minimum_mean_difference: 0.0,
            significance_threshold: 0.05,
            binary_pass_threshold: 0.0,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_spec;
    use super::*;

    #[test]
    fn test_composed_prompt_appends_suffix() {
        let spec = sample_spec();
        assert_eq!(
            spec.composed_prompt(&spec.variants[0]),
            "Build a wordle clone. Use the python skill."
        );
        assert_eq!(
            spec.composed_prompt(&spec.variants[1]),
            "Build a wordle clone."
        );
    }

    #[test]
    fn test_total_sessions() {
        let spec = sample_spec();
        assert_eq!(spec.total_sessions(), 6);
        assert!(spec.supports_significance());
    }

    #[test]
    fn test_rubric_stem() {
        let metric = Metric {
            name: "q".to_string(),
            description: String::new(),
            rubric: "rubrics/code-quality.md".to_string(),
            weight: 1.0,
        };
        assert_eq!(EvalSpec::rubric_stem(&metric), "code-quality");
    }

    #[test]
    fn test_digest_is_stable() {
        let spec = sample_spec();
        assert_eq!(spec.digest(), sample_spec().digest());
        assert_eq!(spec.digest().len(), 64);

        let mut other = sample_spec();
        other.prompt.push('!');
        assert_ne!(spec.digest(), other.digest());
    }

    #[test]
    fn test_fixture_ref_rename() {
        let json = serde_json::to_value(Fixture {
            repo: "https://example.com/repo.git".to_string(),
            path: None,
            git_ref: Some("main".to_string()),
        })
        .unwrap();
        assert_eq!(json["ref"], "main");
        assert!(json.get("path").is_none());
    }
}
