//! Declarative evaluation specs.
//!
//! An eval spec names the fixture every session starts from, the base prompt,
//! the treatment variants, the binary checks and rubric metrics, and the
//! acceptance thresholds used when comparing variants.
//!
//! Spec files are YAML or JSON. They are first loaded into a raw document
//! (see [`load_raw`]) and only become an [`EvalSpec`] after passing
//! [`crate::validation::SpecValidator`].

pub mod types;

use std::fs;
use std::path::Path;

use crate::error::SpecError;

pub use types::{
    rubric_file_stem, Acceptance, BinaryCheck, EvalSpec, Fixture, Metric, Variant,
    COMPOSITE_RUBRIC, DEFAULT_COLLECT_PATTERNS, RUBRIC_EXTENSION,
};

/// Reads a spec file into an untyped JSON document.
///
/// Files ending in `.json` are parsed as JSON; everything else as YAML
/// (which also accepts JSON).
pub fn load_raw(path: &Path) -> Result<serde_json::Value, SpecError> {
    let content = fs::read_to_string(path).map_err(|source| SpecError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| SpecError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_raw_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("eval.yaml");
        fs::write(&path, "name: wordle\nrunsPerVariant: 3\nvariants:\n  - id: a\n").unwrap();

        let raw = load_raw(&path).unwrap();
        assert_eq!(raw["name"], "wordle");
        assert_eq!(raw["runsPerVariant"], 3);
        assert_eq!(raw["variants"][0]["id"], "a");
    }

    #[test]
    fn test_load_raw_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("eval.json");
        fs::write(&path, r#"{"name": "wordle", "version": "1.0"}"#).unwrap();

        let raw = load_raw(&path).unwrap();
        assert_eq!(raw["version"], "1.0");
    }

    #[test]
    fn test_load_raw_missing_file() {
        let err = load_raw(Path::new("/nonexistent/eval.yaml")).unwrap_err();
        assert!(matches!(err, SpecError::Read { .. }));
    }

    #[test]
    fn test_load_raw_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("eval.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_raw(&path).unwrap_err();
        assert!(matches!(err, SpecError::Parse { .. }));
    }
}
