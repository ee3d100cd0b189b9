//! Aggregate report model and its computation.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::stats::{mean, welch_t_test, Descriptive};
use crate::judge::Score;
use crate::scheduler::{RunManifest, RunSummary, SessionRun, SessionStatus};
use crate::spec::Acceptance;

pub use crate::spec::COMPOSITE_RUBRIC;

/// Annotation on comparisons that could not be tested.
pub const INSUFFICIENT_SAMPLE: &str = "insufficient sample size";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub spec_name: String,
    pub spec_digest: String,
    /// Thresholds the comparisons were evaluated against.
    pub acceptance: Acceptance,
    /// Rubric rows in report order; the composite row comes last.
    pub rubrics: Vec<String>,
    pub variants: Vec<VariantSummary>,
    pub comparisons: Vec<RubricComparison>,
    pub pass_rates: Vec<VariantPassRate>,
    pub raw_scores: Vec<RawScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub variant_id: String,
    pub sessions: RunSummary,
    pub stats: Vec<RubricStats>,
}

impl VariantSummary {
    pub fn stats_for(&self, rubric: &str) -> Option<&Descriptive> {
        self.stats
            .iter()
            .find(|s| s.rubric == rubric)
            .map(|s| &s.stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricStats {
    pub rubric: String,
    #[serde(flatten)]
    pub stats: Descriptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricComparison {
    pub rubric: String,
    pub pairs: Vec<PairwiseComparison>,
}

/// One unordered variant pair. Differences are `first - second`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairwiseComparison {
    pub first: String,
    pub second: String,
    pub n_first: usize,
    pub n_second: usize,
    pub mean_difference: Option<f64>,
    /// Difference relative to the second variant's mean, in percent.
    pub percent_improvement: Option<f64>,
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: Option<f64>,
    pub significant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPassRate {
    pub name: String,
    pub weight: f64,
    pub passed: usize,
    pub total: usize,
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPassRate {
    pub variant_id: String,
    /// Sessions that produced binary check results.
    pub sessions_checked: usize,
    pub checks: Vec<CheckPassRate>,
    pub weighted_pass_rate: Option<f64>,
    /// `None` when no session of the variant was checked.
    pub meets_threshold: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScore {
    pub variant_id: String,
    pub run_index: u32,
    pub session_id: String,
    pub rubric: String,
    pub overall: u8,
    pub dimensions: BTreeMap<String, u8>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// Builds the report for a run.
///
/// Pure: the same manifest, scores and acceptance always produce the same
/// report.
pub fn aggregate(manifest: &RunManifest, scores: &[Score], acceptance: &Acceptance) -> AggregateReport {
    let mut notes = Vec::new();
    let variant_ids: Vec<String> = manifest.spec.variants.iter().map(|v| v.id.clone()).collect();

    let sessions: HashMap<&str, &SessionRun> = manifest
        .sessions
        .iter()
        .filter_map(|s| s.session_id.as_deref().map(|id| (id, s)))
        .collect();

    let raw_scores = raw_score_table(manifest, scores, &sessions, &mut notes);
    let rubrics = rubric_rows(manifest, &raw_scores);

    // values[rubric][variant] = overall scores, in raw table order
    let mut values: HashMap<&str, HashMap<&str, Vec<f64>>> = HashMap::new();
    for row in &raw_scores {
        values
            .entry(row.rubric.as_str())
            .or_default()
            .entry(row.variant_id.as_str())
            .or_default()
            .push(row.overall as f64);
    }
    let composite = composite_scores(manifest, &raw_scores);

    let group = |rubric: &str, variant: &str| -> Vec<f64> {
        if rubric == COMPOSITE_RUBRIC {
            return composite.get(variant).cloned().unwrap_or_default();
        }
        values
            .get(rubric)
            .and_then(|by_variant| by_variant.get(variant))
            .cloned()
            .unwrap_or_default()
    };

    let variants: Vec<VariantSummary> = variant_ids
        .iter()
        .map(|variant| VariantSummary {
            variant_id: variant.clone(),
            sessions: variant_counts(manifest, variant),
            stats: rubrics
                .iter()
                .map(|rubric| RubricStats {
                    rubric: rubric.clone(),
                    stats: Descriptive::of(&group(rubric, variant)),
                })
                .collect(),
        })
        .collect();

    for summary in &variants {
        if summary.stats.iter().all(|s| s.stats.n == 0) {
            notes.push(format!("Variant '{}' has no scores", summary.variant_id));
        }
    }

    let comparisons: Vec<RubricComparison> = rubrics
        .iter()
        .map(|rubric| RubricComparison {
            rubric: rubric.clone(),
            pairs: variant_pairs(&variant_ids)
                .map(|(first, second)| {
                    compare(first, second, &group(rubric, first), &group(rubric, second), acceptance)
                })
                .collect(),
        })
        .collect();

    if variant_ids.len() > 2 {
        notes.push(
            "Pairwise p-values are not corrected for multiple comparisons".to_string(),
        );
    }

    let pass_rates = variant_ids
        .iter()
        .map(|variant| pass_rate(manifest, variant, acceptance))
        .collect();

    AggregateReport {
        spec_name: manifest.spec.name.clone(),
        spec_digest: manifest.spec_digest.clone(),
        acceptance: acceptance.clone(),
        rubrics,
        variants,
        comparisons,
        pass_rates,
        raw_scores,
        notes,
    }
}

/// Joins scores to their sessions, in manifest order then rubric order.
fn raw_score_table(
    manifest: &RunManifest,
    scores: &[Score],
    sessions: &HashMap<&str, &SessionRun>,
    notes: &mut Vec<String>,
) -> Vec<RawScore> {
    let mut rows: Vec<(usize, RawScore)> = Vec::with_capacity(scores.len());
    let position: HashMap<&str, usize> = manifest
        .sessions
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.session_id.as_deref().map(|id| (id, i)))
        .collect();

    for score in scores {
        let Some(session) = sessions.get(score.session_id.as_str()) else {
            notes.push(format!(
                "Score for rubric '{}' names unknown session {}",
                score.rubric, score.session_id
            ));
            continue;
        };
        rows.push((
            position.get(score.session_id.as_str()).copied().unwrap_or(usize::MAX),
            RawScore {
                variant_id: session.variant_id.clone(),
                run_index: session.run_index,
                session_id: score.session_id.clone(),
                rubric: score.rubric.clone(),
                overall: score.scores.overall,
                dimensions: score.scores.dimensions.clone(),
                partial: score.partial,
            },
        ));
    }

    rows.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.rubric.cmp(&b.rubric)));
    rows.into_iter().map(|(_, row)| row).collect()
}

/// Metric rubrics in spec order, then any other judged rubric, then the
/// composite row.
fn rubric_rows(manifest: &RunManifest, raw_scores: &[RawScore]) -> Vec<String> {
    let mut rubrics: Vec<String> = manifest.metric_weights.iter().map(metric_rubric).collect();
    let mut extra: Vec<String> = raw_scores
        .iter()
        .map(|row| row.rubric.clone())
        .filter(|r| !rubrics.contains(r))
        .collect();
    extra.sort();
    extra.dedup();
    rubrics.extend(extra);
    rubrics.push(COMPOSITE_RUBRIC.to_string());
    rubrics
}

fn metric_rubric(entry: &crate::scheduler::WeightEntry) -> String {
    entry.rubric.clone().unwrap_or_else(|| entry.name.clone())
}

/// Per session, the metric-weighted mean of rubric scores, renormalised
/// over the rubrics that were actually scored. Grouped by variant.
fn composite_scores(manifest: &RunManifest, raw_scores: &[RawScore]) -> HashMap<String, Vec<f64>> {
    let weights: HashMap<String, f64> = manifest
        .metric_weights
        .iter()
        .map(|entry| (metric_rubric(entry), entry.weight))
        .collect();

    let mut per_session: Vec<(&str, &str, f64, f64)> = Vec::new();
    for row in raw_scores {
        let Some(weight) = weights.get(&row.rubric).copied() else {
            continue;
        };
        match per_session
            .iter_mut()
            .find(|(session, _, _, _)| *session == row.session_id)
        {
            Some(entry) => {
                entry.2 += weight * row.overall as f64;
                entry.3 += weight;
            }
            None => per_session.push((
                row.session_id.as_str(),
                row.variant_id.as_str(),
                weight * row.overall as f64,
                weight,
            )),
        }
    }

    let mut composite: HashMap<String, Vec<f64>> = HashMap::new();
    for (_, variant, weighted_sum, weight_sum) in per_session {
        if weight_sum > 0.0 {
            composite
                .entry(variant.to_string())
                .or_default()
                .push(weighted_sum / weight_sum);
        }
    }
    composite
}

fn variant_pairs(variants: &[String]) -> impl Iterator<Item = (&str, &str)> {
    variants.iter().enumerate().flat_map(move |(i, first)| {
        variants[i + 1..]
            .iter()
            .map(move |second| (first.as_str(), second.as_str()))
    })
}

fn compare(
    first: &str,
    second: &str,
    a: &[f64],
    b: &[f64],
    acceptance: &Acceptance,
) -> PairwiseComparison {
    let mean_a = mean(a);
    let mean_b = mean(b);
    let mean_difference = mean_a.zip(mean_b).map(|(x, y)| x - y);
    let percent_improvement = mean_difference
        .zip(mean_b)
        .filter(|(_, base)| *base != 0.0)
        .map(|(diff, base)| diff / base * 100.0);

    let mut comparison = PairwiseComparison {
        first: first.to_string(),
        second: second.to_string(),
        n_first: a.len(),
        n_second: b.len(),
        mean_difference,
        percent_improvement,
        t_statistic: None,
        degrees_of_freedom: None,
        p_value: None,
        significant: false,
        note: None,
    };

    match welch_t_test(a, b) {
        Some(test) => {
            comparison.significant = test.p_value < acceptance.significance_threshold
                && mean_difference
                    .is_some_and(|diff| diff.abs() >= acceptance.minimum_mean_difference);
            comparison.t_statistic = test.t_statistic;
            comparison.degrees_of_freedom = test.degrees_of_freedom;
            comparison.p_value = Some(test.p_value);
        }
        None => comparison.note = Some(INSUFFICIENT_SAMPLE.to_string()),
    }
    comparison
}

fn variant_counts(manifest: &RunManifest, variant: &str) -> RunSummary {
    let mut counts = RunSummary::default();
    for session in manifest.sessions.iter().filter(|s| s.variant_id == variant) {
        counts.total += 1;
        match session.status {
            SessionStatus::Completed => counts.completed += 1,
            SessionStatus::Failed => counts.failed += 1,
            SessionStatus::TimedOut => counts.timed_out += 1,
            SessionStatus::Pending | SessionStatus::Running => counts.unfinished += 1,
        }
    }
    counts
}

/// Pass rates over the variant's sessions that produced check results.
fn pass_rate(manifest: &RunManifest, variant: &str, acceptance: &Acceptance) -> VariantPassRate {
    let checked: Vec<&SessionRun> = manifest
        .sessions
        .iter()
        .filter(|s| s.variant_id == variant && s.has_check_results())
        .collect();

    let checks: Vec<CheckPassRate> = manifest
        .binary_check_weights
        .iter()
        .map(|entry| {
            let passed = checked
                .iter()
                .filter(|s| {
                    s.binary_check_results
                        .iter()
                        .any(|r| r.name == entry.name && r.passed)
                })
                .count();
            let total = checked.len();
            CheckPassRate {
                name: entry.name.clone(),
                weight: entry.weight,
                passed,
                total,
                rate: (total > 0).then(|| passed as f64 / total as f64),
            }
        })
        .collect();

    let weighted_pass_rate = (!checked.is_empty()).then(|| {
        checks
            .iter()
            .map(|c| c.weight * c.rate.unwrap_or(0.0))
            .sum::<f64>()
    });

    VariantPassRate {
        variant_id: variant.to_string(),
        sessions_checked: checked.len(),
        checks,
        weighted_pass_rate,
        meets_threshold: weighted_pass_rate.map(|rate| rate >= acceptance.binary_pass_threshold),
    }
}
