//! Schema validation for eval specs.
//!
//! Validates a raw spec document against the canonical schema, checking for
//! required fields, field-name typos, weight sums and rubric references.
//! Every defect is collected; nothing is reported one at a time.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::diagnostics::Diagnostics;
use crate::error::{SpecError, SpecViolation};
use crate::spec::{
    rubric_file_stem, Acceptance, BinaryCheck, EvalSpec, Fixture, Metric, Variant,
    COMPOSITE_RUBRIC, DEFAULT_COLLECT_PATTERNS, RUBRIC_EXTENSION,
};

/// Tolerance used when checking that a weight list sums to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const REQUIRED_FIELDS: &[&str] = &[
    "name",
    "version",
    "fixture",
    "variants",
    "binaryChecks",
    "metrics",
    "runsPerVariant",
    "acceptance",
];

const TOP_LEVEL_FIELDS: &[&str] = &[
    "name",
    "version",
    "description",
    "fixture",
    "prompt",
    "variants",
    "binaryChecks",
    "metrics",
    "runsPerVariant",
    "acceptance",
    "collect",
];

const FIXTURE_FIELDS: &[&str] = &["repo", "path", "ref"];
const VARIANT_FIELDS: &[&str] = &["id", "name", "suffix", "promptSuffix", "description"];
const CHECK_FIELDS: &[&str] = &["name", "description", "checkTemplate", "weight"];
const METRIC_FIELDS: &[&str] = &["name", "description", "rubric", "weight"];
const ACCEPTANCE_FIELDS: &[&str] = &[
    "minimumMeanDifference",
    "significanceThreshold",
    "binaryPassThreshold",
];

/// Misspellings seen in hand-written specs, mapped to the intended field.
const KNOWN_TYPOS: &[(&str, &str)] = &[
    ("repository", "repo"),
    ("url", "repo"),
    ("branch", "ref"),
    ("runs", "runsPerVariant"),
    ("checks", "binaryChecks"),
    ("command", "checkTemplate"),
    ("check", "checkTemplate"),
    ("template", "checkTemplate"),
    ("rubricFile", "rubric"),
];

/// A spec that passed every structural and weight rule.
#[derive(Debug, Clone)]
pub struct ValidatedSpec {
    pub spec: EvalSpec,
    /// Non-fatal observations (also reported through [`Diagnostics`]).
    pub warnings: Vec<String>,
}

impl ValidatedSpec {
    pub fn digest(&self) -> String {
        self.spec.digest()
    }
}

/// Accumulates violations and warnings while walking a raw spec.
#[derive(Debug, Default)]
struct ValidationReport {
    errors: Vec<SpecViolation>,
    warnings: Vec<String>,
}

impl ValidationReport {
    fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(SpecViolation::new(field, message));
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validator for eval specs.
#[derive(Debug, Clone, Default)]
pub struct SpecValidator {
    rubrics_dir: Option<PathBuf>,
    diagnostics: Diagnostics,
}

impl SpecValidator {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            rubrics_dir: None,
            diagnostics,
        }
    }

    /// Also requires every rubric reference to exist under `dir`.
    pub fn with_rubrics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rubrics_dir = Some(dir.into());
        self
    }

    /// Validates a raw spec document.
    ///
    /// Returns the normalised spec, or `SpecError::Invalid` carrying every
    /// violation found.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedSpec, SpecError> {
        let mut report = ValidationReport::default();

        let Some(root) = raw.as_object() else {
            return Err(SpecError::Invalid(vec![SpecViolation::new(
                "<root>",
                "spec must be a mapping of fields",
            )]));
        };

        for field in REQUIRED_FIELDS {
            if !root.contains_key(*field) {
                report.add_error(*field, "required field is missing");
            }
        }
        check_unknown_fields(root, TOP_LEVEL_FIELDS, "", &mut report);

        let name = required_string(root, "name", "name", &mut report);
        let version = root.get("version").and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => {
                report.add_error("version", "must be a non-empty string");
                None
            }
        });
        let description = optional_string(root, "description", "description", &mut report);
        let prompt = match optional_string(root, "prompt", "prompt", &mut report) {
            Some(prompt) => prompt,
            None => {
                if !root.contains_key("prompt") {
                    report.add_warning("no base prompt given; variants receive only their suffix");
                }
                String::new()
            }
        };

        let fixture = root.get("fixture").and_then(|v| parse_fixture(v, &mut report));
        let variants = root.get("variants").and_then(|v| parse_variants(v, &mut report));
        let runs_per_variant = root
            .get("runsPerVariant")
            .and_then(|v| parse_runs(v, &mut report));
        let binary_checks = root
            .get("binaryChecks")
            .and_then(|v| parse_checks(v, &mut report));
        let metrics = root
            .get("metrics")
            .and_then(|v| self.parse_metrics(v, &mut report));
        let acceptance = root
            .get("acceptance")
            .and_then(|v| parse_acceptance(v, &mut report));
        let collect = parse_collect(root.get("collect"), &mut report);

        if !report.errors.is_empty() {
            return Err(SpecError::Invalid(report.errors));
        }

        match (
            name,
            version,
            fixture,
            variants,
            runs_per_variant,
            binary_checks,
            metrics,
            acceptance,
        ) {
            (
                Some(name),
                Some(version),
                Some(fixture),
                Some(variants),
                Some(runs_per_variant),
                Some(binary_checks),
                Some(metrics),
                Some(acceptance),
            ) => {
                for warning in &report.warnings {
                    self.diagnostics.warn("validation", warning.clone());
                }
                Ok(ValidatedSpec {
                    spec: EvalSpec {
                        name,
                        version,
                        description,
                        fixture,
                        prompt,
                        variants,
                        runs_per_variant,
                        binary_checks,
                        metrics,
                        acceptance,
                        collect,
                    },
                    warnings: report.warnings,
                })
            }
            // Every parser records an error when it yields None.
            _ => Err(SpecError::Invalid(vec![SpecViolation::new(
                "<root>",
                "spec is incomplete",
            )])),
        }
    }

    fn parse_metrics(&self, value: &Value, report: &mut ValidationReport) -> Option<Vec<Metric>> {
        let entries = expect_list(value, "metrics", report)?;
        let mut metrics = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        let mut stems = HashSet::new();
        let mut weights = Vec::with_capacity(entries.len());
        let mut weights_complete = true;

        for (idx, entry) in entries.iter().enumerate() {
            let path = format!("metrics[{}]", idx);
            let Some(obj) = expect_object(entry, &path, report) else {
                weights_complete = false;
                continue;
            };
            check_unknown_fields(obj, METRIC_FIELDS, &path, report);

            let name = required_string(obj, "name", &format!("{}.name", path), report);
            let description =
                optional_string(obj, "description", &format!("{}.description", path), report)
                    .unwrap_or_default();
            let rubric = required_string(obj, "rubric", &format!("{}.rubric", path), report);
            let weight = required_weight(obj, &format!("{}.weight", path), report);
            match weight {
                Some(w) => weights.push(w),
                None => weights_complete = false,
            }

            if let Some(ref rubric) = rubric {
                let stem = rubric_file_stem(rubric);
                if stem == COMPOSITE_RUBRIC {
                    report.add_error(
                        format!("{}.rubric", path),
                        format!(
                            "rubric stem '{}' is reserved for the composite score",
                            COMPOSITE_RUBRIC
                        ),
                    );
                } else if !stems.insert(stem.clone()) {
                    report.add_error(
                        format!("{}.rubric", path),
                        format!("rubric stem '{}' is used by another metric", stem),
                    );
                }

                if !rubric.ends_with(RUBRIC_EXTENSION) {
                    report.add_error(
                        format!("{}.rubric", path),
                        format!(
                            "rubric '{}' has an unrecognized extension (expected '{}')",
                            rubric, RUBRIC_EXTENSION
                        ),
                    );
                } else if let Some(ref dir) = self.rubrics_dir {
                    if !dir.join(rubric).is_file() {
                        report.add_error(
                            format!("{}.rubric", path),
                            format!("rubric '{}' not found in {}", rubric, dir.display()),
                        );
                    }
                }
            }

            if let Some(ref name) = name {
                if !seen.insert(name.clone()) {
                    report.add_error(
                        format!("{}.name", path),
                        format!("duplicate metric name '{}'", name),
                    );
                }
            }

            if let (Some(name), Some(rubric), Some(weight)) = (name, rubric, weight) {
                metrics.push(Metric {
                    name,
                    description,
                    rubric,
                    weight,
                });
            }
        }

        if weights_complete {
            check_weight_sum("metrics", weights.into_iter(), report);
        }
        Some(metrics)
    }
}

fn check_weight_sum(field: &str, weights: impl Iterator<Item = f64>, report: &mut ValidationReport) {
    let sum: f64 = weights.sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        report.add_error(
            field,
            format!("weights sum to {}, expected 1.0 (±{})", sum, WEIGHT_TOLERANCE),
        );
    }
}

fn check_unknown_fields(
    obj: &Map<String, Value>,
    known: &[&str],
    path: &str,
    report: &mut ValidationReport,
) {
    for key in obj.keys() {
        if known.contains(&key.as_str()) {
            continue;
        }
        let field = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let message = match suggest_field(key, known) {
            Some(suggestion) => format!("unknown field '{}' (did you mean '{}'?)", key, suggestion),
            None => format!(
                "unknown field '{}' (expected one of: {})",
                key,
                known.join(", ")
            ),
        };
        report.add_error(field, message);
    }
}

fn suggest_field(key: &str, known: &[&str]) -> Option<&'static str> {
    if let Some((_, target)) = KNOWN_TYPOS
        .iter()
        .find(|(typo, target)| *typo == key && known.contains(target))
    {
        return Some(*target);
    }

    let normalized = normalize_key(key);
    KNOWN_TYPOS
        .iter()
        .map(|(_, target)| *target)
        .chain(
            [
                TOP_LEVEL_FIELDS,
                FIXTURE_FIELDS,
                VARIANT_FIELDS,
                CHECK_FIELDS,
                METRIC_FIELDS,
                ACCEPTANCE_FIELDS,
            ]
            .into_iter()
            .flatten()
            .copied(),
        )
        .find(|candidate| known.contains(candidate) && normalize_key(candidate) == normalized)
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn expect_list<'a>(
    value: &'a Value,
    field: &str,
    report: &mut ValidationReport,
) -> Option<&'a Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(_) => {
            report.add_error(field, "must be a list, not a keyed map");
            None
        }
        _ => {
            report.add_error(field, "must be a list");
            None
        }
    }
}

fn expect_object<'a>(
    value: &'a Value,
    field: &str,
    report: &mut ValidationReport,
) -> Option<&'a Map<String, Value>> {
    match value.as_object() {
        Some(obj) => Some(obj),
        None => {
            report.add_error(field, "must be a mapping");
            None
        }
    }
}

fn required_string(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
    report: &mut ValidationReport,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            report.add_error(field, "must not be empty");
            None
        }
        Some(_) => {
            report.add_error(field, "must be a string");
            None
        }
        // Top-level absences are reported once by the required-field pass.
        None if field.contains('.') || field.contains('[') => {
            report.add_error(field, "required field is missing");
            None
        }
        None => None,
    }
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    field: &str,
    report: &mut ValidationReport,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(_) => {
            report.add_error(field, "must be a string");
            None
        }
    }
}

fn required_weight(
    obj: &Map<String, Value>,
    field: &str,
    report: &mut ValidationReport,
) -> Option<f64> {
    match obj.get("weight").map(Value::as_f64) {
        Some(Some(w)) if w >= 0.0 && w.is_finite() => Some(w),
        Some(Some(w)) => {
            report.add_error(field, format!("weight must be non-negative, got {}", w));
            None
        }
        Some(None) => {
            report.add_error(field, "weight must be a number");
            None
        }
        None => {
            report.add_error(field, "required field is missing");
            None
        }
    }
}

fn parse_fixture(value: &Value, report: &mut ValidationReport) -> Option<Fixture> {
    let obj = expect_object(value, "fixture", report)?;
    check_unknown_fields(obj, FIXTURE_FIELDS, "fixture", report);

    let repo = required_string(obj, "repo", "fixture.repo", report);
    let path = optional_string(obj, "path", "fixture.path", report);
    let git_ref = optional_string(obj, "ref", "fixture.ref", report);

    repo.map(|repo| Fixture {
        repo,
        path,
        git_ref,
    })
}

fn parse_variants(value: &Value, report: &mut ValidationReport) -> Option<Vec<Variant>> {
    let entries = expect_list(value, "variants", report)?;
    if entries.is_empty() {
        report.add_error("variants", "at least one variant is required");
        return None;
    }

    let mut variants = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();

    for (idx, entry) in entries.iter().enumerate() {
        let path = format!("variants[{}]", idx);
        let Some(obj) = expect_object(entry, &path, report) else {
            continue;
        };
        check_unknown_fields(obj, VARIANT_FIELDS, &path, report);

        let id = either_field(obj, "id", "name", &path, true, report);
        let suffix = either_field(obj, "suffix", "promptSuffix", &path, false, report);

        if let Some(ref id) = id {
            if !seen.insert(id.clone()) {
                report.add_error(format!("{}.id", path), format!("duplicate variant id '{}'", id));
            }
        }

        if let (Some(id), Some(suffix)) = (id, suffix) {
            variants.push(Variant { id, suffix });
        }
    }

    Some(variants)
}

/// Reads a field that may be spelled two ways, normalising to the first.
fn either_field(
    obj: &Map<String, Value>,
    primary: &str,
    alternate: &str,
    path: &str,
    non_empty: bool,
    report: &mut ValidationReport,
) -> Option<String> {
    let read = |key: &str, report: &mut ValidationReport| -> Option<Option<String>> {
        match obj.get(key) {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(s)) => Some(Some(s.clone())),
            Some(_) => {
                report.add_error(format!("{}.{}", path, key), "must be a string");
                None
            }
        }
    };

    let first = read(primary, report)?;
    let second = read(alternate, report)?;

    let value = match (first, second) {
        (Some(a), Some(b)) if a != b => {
            report.add_error(
                format!("{}.{}", path, primary),
                format!(
                    "'{}' and '{}' are both set with different values",
                    primary, alternate
                ),
            );
            return None;
        }
        (Some(a), _) => a,
        (None, Some(b)) => b,
        (None, None) => {
            report.add_error(
                format!("{}.{}", path, primary),
                format!("must supply either '{}' or '{}'", primary, alternate),
            );
            return None;
        }
    };

    if non_empty && value.trim().is_empty() {
        report.add_error(format!("{}.{}", path, primary), "must not be empty");
        return None;
    }
    Some(value)
}

fn parse_runs(value: &Value, report: &mut ValidationReport) -> Option<u32> {
    match value.as_u64() {
        Some(0) | None => {
            report.add_error("runsPerVariant", "must be a positive integer");
            None
        }
        Some(n) if n > u32::MAX as u64 => {
            report.add_error("runsPerVariant", "is too large");
            None
        }
        Some(n) => {
            if n == 1 {
                report.add_warning(
                    "runsPerVariant is 1; significance testing needs at least 2 runs per variant",
                );
            }
            Some(n as u32)
        }
    }
}

fn parse_checks(value: &Value, report: &mut ValidationReport) -> Option<Vec<BinaryCheck>> {
    let entries = expect_list(value, "binaryChecks", report)?;
    let mut checks = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    let mut weights = Vec::with_capacity(entries.len());
    let mut weights_complete = true;

    for (idx, entry) in entries.iter().enumerate() {
        let path = format!("binaryChecks[{}]", idx);
        let Some(obj) = expect_object(entry, &path, report) else {
            weights_complete = false;
            continue;
        };
        check_unknown_fields(obj, CHECK_FIELDS, &path, report);

        let name = required_string(obj, "name", &format!("{}.name", path), report);
        let description =
            optional_string(obj, "description", &format!("{}.description", path), report)
                .unwrap_or_default();
        let template =
            required_string(obj, "checkTemplate", &format!("{}.checkTemplate", path), report);
        let weight = required_weight(obj, &format!("{}.weight", path), report);
        match weight {
            Some(w) => weights.push(w),
            None => weights_complete = false,
        }

        if let Some(ref name) = name {
            if !seen.insert(name.clone()) {
                report.add_error(
                    format!("{}.name", path),
                    format!("duplicate binary check name '{}'", name),
                );
            }
        }

        if let (Some(name), Some(check_template), Some(weight)) = (name, template, weight) {
            checks.push(BinaryCheck {
                name,
                description,
                check_template,
                weight,
            });
        }
    }

    if weights_complete {
        check_weight_sum("binaryChecks", weights.into_iter(), report);
    }
    Some(checks)
}

fn parse_acceptance(value: &Value, report: &mut ValidationReport) -> Option<Acceptance> {
    let obj = expect_object(value, "acceptance", report)?;
    check_unknown_fields(obj, ACCEPTANCE_FIELDS, "acceptance", report);

    let defaults = Acceptance::default();
    let mut number = |key: &str, default: f64, valid: fn(f64) -> bool, range: &str| {
        match obj.get(key) {
            None | Some(Value::Null) => Some(default),
            Some(v) => match v.as_f64() {
                Some(n) if valid(n) => Some(n),
                Some(n) => {
                    report.add_error(
                        format!("acceptance.{}", key),
                        format!("must be {}, got {}", range, n),
                    );
                    None
                }
                None => {
                    report.add_error(format!("acceptance.{}", key), "must be a number");
                    None
                }
            },
        }
    };

    let minimum_mean_difference = number(
        "minimumMeanDifference",
        defaults.minimum_mean_difference,
        |n| n >= 0.0 && n.is_finite(),
        ">= 0",
    );
    let significance_threshold = number(
        "significanceThreshold",
        defaults.significance_threshold,
        |n| n > 0.0 && n < 1.0,
        "in (0, 1)",
    );
    let binary_pass_threshold = number(
        "binaryPassThreshold",
        defaults.binary_pass_threshold,
        |n| (0.0..=1.0).contains(&n),
        "in [0, 1]",
    );

    Some(Acceptance {
        minimum_mean_difference: minimum_mean_difference?,
        significance_threshold: significance_threshold?,
        binary_pass_threshold: binary_pass_threshold?,
    })
}

fn parse_collect(value: Option<&Value>, report: &mut ValidationReport) -> Vec<String> {
    let defaults = || -> Vec<String> {
        DEFAULT_COLLECT_PATTERNS.iter().map(|p| p.to_string()).collect()
    };
    let Some(value) = value else {
        return defaults();
    };
    let Some(entries) = expect_list(value, "collect", report) else {
        return Vec::new();
    };

    let mut patterns = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let field = format!("collect[{}]", idx);
        match entry.as_str() {
            Some(pattern) => match globset::Glob::new(pattern) {
                Ok(_) => patterns.push(pattern.to_string()),
                Err(e) => report.add_error(field, format!("invalid glob: {}", e)),
            },
            None => report.add_error(field, "must be a string"),
        }
    }
    if patterns.is_empty() && report.errors.is_empty() {
        report.add_warning("collect is empty; judges will see no artifacts");
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn valid_raw() -> Value {
        json!({
            "name": "wordle",
            "version": "1.0",
            "fixture": { "repo": "./fixtures/empty" },
            "prompt": "Build a wordle clone.",
            "variants": [
                { "id": "with-skill", "suffix": " Use the skill." },
                { "name": "without-skill", "promptSuffix": "" }
            ],
            "runsPerVariant": 3,
            "binaryChecks": [
                { "name": "has-game", "checkTemplate": "test -f {workspace}/game.py", "weight": 0.7 },
                { "name": "runs", "checkTemplate": "python3 {workspace}/game.py --help", "weight": 0.3 }
            ],
            "metrics": [
                { "name": "quality", "rubric": "code-quality.md", "weight": 1.0 }
            ],
            "acceptance": { "significanceThreshold": 0.05 }
        })
    }

    fn validate(raw: &Value) -> Result<ValidatedSpec, SpecError> {
        SpecValidator::default().validate(raw)
    }

    fn fields(err: &SpecError) -> Vec<String> {
        err.violations().iter().map(|v| v.field.clone()).collect()
    }

    #[test]
    fn test_valid_spec_normalizes_variants() {
        let validated = validate(&valid_raw()).unwrap();
        let spec = validated.spec;

        assert_eq!(spec.variants[1].id, "without-skill");
        assert_eq!(spec.variants[1].suffix, "");
        assert_eq!(spec.runs_per_variant, 3);
        assert_eq!(spec.acceptance.significance_threshold, 0.05);
        assert_eq!(spec.acceptance.binary_pass_threshold, 0.0);
        assert!(!spec.collect.is_empty());
    }

    #[test]
    fn test_suffix_and_prompt_suffix_compose_identically() {
        let mut a = valid_raw();
        a["variants"][0] = json!({ "id": "v", "suffix": " extra" });
        let mut b = valid_raw();
        b["variants"][0] = json!({ "id": "v", "promptSuffix": " extra" });

        let a = validate(&a).unwrap().spec;
        let b = validate(&b).unwrap().spec;
        assert_eq!(a.variants[0], b.variants[0]);
        assert_eq!(
            a.composed_prompt(&a.variants[0]),
            b.composed_prompt(&b.variants[0])
        );
    }

    #[test]
    fn test_binary_check_weight_sum_named() {
        let mut raw = valid_raw();
        raw["binaryChecks"][1]["weight"] = json!(0.2);

        let err = validate(&raw).unwrap_err();
        assert_eq!(fields(&err), vec!["binaryChecks".to_string()]);
        assert!(err.violations()[0].message.contains("0.9"));
    }

    #[test]
    fn test_metric_weight_sum_named() {
        let mut raw = valid_raw();
        raw["metrics"][0]["weight"] = json!(0.5);

        let err = validate(&raw).unwrap_err();
        assert_eq!(fields(&err), vec!["metrics".to_string()]);
    }

    #[test]
    fn test_weight_sum_within_tolerance() {
        let mut raw = valid_raw();
        raw["binaryChecks"][0]["weight"] = json!(0.1);
        raw["binaryChecks"][1]["weight"] = json!(0.2);
        raw["binaryChecks"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "third", "checkTemplate": "true", "weight": 0.7 }));

        // 0.1 + 0.2 + 0.7 is not exactly 1.0 in floating point.
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn test_all_errors_collected() {
        let mut raw = valid_raw();
        raw.as_object_mut().unwrap().remove("version");
        raw["binaryChecks"][0]["weight"] = json!(0.1);
        raw["metrics"][0]["rubric"] = json!("code-quality.txt");
        raw["runsPerVariant"] = json!(0);

        let err = validate(&raw).unwrap_err();
        let fields = fields(&err);
        assert!(fields.contains(&"version".to_string()));
        assert!(fields.contains(&"binaryChecks".to_string()));
        assert!(fields.contains(&"metrics[0].rubric".to_string()));
        assert!(fields.contains(&"runsPerVariant".to_string()));
    }

    #[test]
    fn test_weight_sum_reported_alongside_entry_errors() {
        let mut raw = valid_raw();
        raw["binaryChecks"][0]["weight"] = json!(0.5);
        raw["binaryChecks"][1]["weight"] = json!(0.4);
        raw["binaryChecks"][0]["desc"] = json!("typo of description");
        raw["metrics"] = json!([
            { "name": "quality", "rubric": "code-quality.md", "weight": 0.5 },
            { "name": "quality", "rubric": "ux.md", "weight": 0.2 }
        ]);

        let err = validate(&raw).unwrap_err();
        let fields = fields(&err);
        assert!(fields.contains(&"binaryChecks[0].desc".to_string()));
        assert!(fields.contains(&"binaryChecks".to_string()));
        assert!(fields.contains(&"metrics[1].name".to_string()));
        assert!(fields.contains(&"metrics".to_string()));
    }

    #[test]
    fn test_weight_sum_skipped_when_weight_unreadable() {
        let mut raw = valid_raw();
        raw["binaryChecks"][1]["weight"] = json!("heavy");

        let err = validate(&raw).unwrap_err();
        assert_eq!(fields(&err), vec!["binaryChecks[1].weight".to_string()]);
    }

    #[test]
    fn test_reserved_and_duplicate_rubric_stems_rejected() {
        let mut raw = valid_raw();
        raw["metrics"] = json!([
            { "name": "composite", "rubric": "overall.md", "weight": 0.4 },
            { "name": "style", "rubric": "a/quality.md", "weight": 0.3 },
            { "name": "craft", "rubric": "b/quality.md", "weight": 0.3 }
        ]);

        let err = validate(&raw).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].field, "metrics[0].rubric");
        assert!(violations[0].message.contains("reserved"));
        assert_eq!(violations[1].field, "metrics[2].rubric");
        assert!(violations[1].message.contains("'quality'"));
    }

    #[test]
    fn test_missing_required_fields_named() {
        let err = validate(&json!({})).unwrap_err();
        let fields = fields(&err);
        for field in REQUIRED_FIELDS {
            assert!(fields.contains(&field.to_string()), "missing {}", field);
        }
    }

    #[test]
    fn test_fixture_repository_typo_rejected() {
        let mut raw = valid_raw();
        raw["fixture"] = json!({ "repository": "./fixtures/empty" });

        let err = validate(&raw).unwrap_err();
        let typo = err
            .violations()
            .iter()
            .find(|v| v.field == "fixture.repository")
            .expect("typo reported");
        assert!(typo.message.contains("did you mean 'repo'"));
        assert!(fields(&err).contains(&"fixture.repo".to_string()));
    }

    #[test]
    fn test_snake_case_top_level_suggests_camel_case() {
        let mut raw = valid_raw();
        let runs = raw.as_object_mut().unwrap().remove("runsPerVariant").unwrap();
        raw["runs_per_variant"] = runs;

        let err = validate(&raw).unwrap_err();
        let typo = err
            .violations()
            .iter()
            .find(|v| v.field == "runs_per_variant")
            .unwrap();
        assert!(typo.message.contains("runsPerVariant"));
    }

    #[test]
    fn test_variants_map_rejected() {
        let mut raw = valid_raw();
        raw["variants"] = json!({ "a": { "suffix": "" } });

        let err = validate(&raw).unwrap_err();
        let violation = &err.violations()[0];
        assert_eq!(violation.field, "variants");
        assert!(violation.message.contains("not a keyed map"));
    }

    #[test]
    fn test_variant_without_suffix_rejected() {
        let mut raw = valid_raw();
        raw["variants"][0] = json!({ "id": "bare" });

        let err = validate(&raw).unwrap_err();
        assert!(fields(&err).contains(&"variants[0].suffix".to_string()));
    }

    #[test]
    fn test_conflicting_id_and_name_rejected() {
        let mut raw = valid_raw();
        raw["variants"][0] = json!({ "id": "a", "name": "b", "suffix": "" });

        let err = validate(&raw).unwrap_err();
        assert!(fields(&err).contains(&"variants[0].id".to_string()));
    }

    #[test]
    fn test_duplicate_variant_ids_rejected() {
        let mut raw = valid_raw();
        raw["variants"][1] = json!({ "id": "with-skill", "suffix": "" });

        let err = validate(&raw).unwrap_err();
        assert!(err.violations()[0].message.contains("duplicate variant id"));
    }

    #[test]
    fn test_single_run_warns() {
        let mut raw = valid_raw();
        raw["runsPerVariant"] = json!(1);

        let diagnostics = Diagnostics::new();
        let validated = SpecValidator::new(diagnostics.clone()).validate(&raw).unwrap();
        assert_eq!(validated.warnings.len(), 1);
        assert_eq!(diagnostics.messages_for("validation").len(), 1);
    }

    #[test]
    fn test_rubric_must_exist_when_dir_given() {
        let temp = TempDir::new().unwrap();
        let validator = SpecValidator::default().with_rubrics_dir(temp.path());

        let err = validator.validate(&valid_raw()).unwrap_err();
        assert!(err.violations()[0].message.contains("not found"));

        std::fs::write(temp.path().join("code-quality.md"), "# Quality").unwrap();
        assert!(validator.validate(&valid_raw()).is_ok());
    }

    #[test]
    fn test_acceptance_out_of_range() {
        let mut raw = valid_raw();
        raw["acceptance"] = json!({ "significanceThreshold": 1.5, "binaryPassThreshold": -0.1 });

        let err = validate(&raw).unwrap_err();
        let fields = fields(&err);
        assert!(fields.contains(&"acceptance.significanceThreshold".to_string()));
        assert!(fields.contains(&"acceptance.binaryPassThreshold".to_string()));
    }

    #[test]
    fn test_non_object_root() {
        let err = validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.violations()[0].field, "<root>");
    }
}
