//! Markdown rendering of an [`AggregateReport`].

use super::report::{AggregateReport, PairwiseComparison, INSUFFICIENT_SAMPLE};
use super::stats::Descriptive;

/// Renders the report as a Markdown document.
pub fn render_markdown(report: &AggregateReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Evaluation report: {}\n\n", report.spec_name));
    md.push_str(&format!("Spec digest: `{}`\n\n", report.spec_digest));
    md.push_str(&format!(
        "Acceptance: p < {}, minimum mean difference {}, binary pass threshold {}\n\n",
        report.acceptance.significance_threshold,
        report.acceptance.minimum_mean_difference,
        report.acceptance.binary_pass_threshold
    ));

    render_summary(report, &mut md);
    render_comparisons(report, &mut md);
    render_pass_rates(report, &mut md);
    render_raw_scores(report, &mut md);

    if !report.notes.is_empty() {
        md.push_str("## Notes\n\n");
        for note in &report.notes {
            md.push_str(&format!("- {}\n", note));
        }
        md.push('\n');
    }

    md
}

fn render_summary(report: &AggregateReport, md: &mut String) {
    md.push_str("## Summary\n\n");
    md.push_str("| Variant | Sessions | Completed | Failed | Timed out |");
    for rubric in &report.rubrics {
        md.push_str(&format!(" {} |", rubric));
    }
    md.push('\n');
    md.push_str("|---|---|---|---|---|");
    for _ in &report.rubrics {
        md.push_str("---|");
    }
    md.push('\n');

    for variant in &report.variants {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |",
            variant.variant_id,
            variant.sessions.total,
            variant.sessions.completed,
            variant.sessions.failed,
            variant.sessions.timed_out
        ));
        for rubric in &report.rubrics {
            let cell = variant
                .stats_for(rubric)
                .map(stats_cell)
                .unwrap_or_else(|| "n/a".to_string());
            md.push_str(&format!(" {} |", cell));
        }
        md.push('\n');
    }
    md.push('\n');
}

fn stats_cell(stats: &Descriptive) -> String {
    match (stats.mean, stats.stddev) {
        (None, _) => "n/a (n=0)".to_string(),
        (Some(mean), Some(sd)) => format!("{:.2} ± {:.2} (n={})", mean, sd, stats.n),
        (Some(mean), None) => format!("{:.2} (n={})", mean, stats.n),
    }
}

fn render_comparisons(report: &AggregateReport, md: &mut String) {
    md.push_str("## Comparisons\n\n");
    if report.variants.len() < 2 {
        md.push_str("Only one variant; nothing to compare.\n\n");
        return;
    }

    for comparison in &report.comparisons {
        md.push_str(&format!("### {}\n\n", comparison.rubric));
        md.push_str("| Comparison | Difference | Improvement | p-value | Significant |\n");
        md.push_str("|---|---|---|---|---|\n");
        for pair in &comparison.pairs {
            md.push_str(&format!(
                "| {} vs {} | {} | {} | {} | {} |\n",
                pair.first,
                pair.second,
                pair.mean_difference
                    .map(|d| format!("{:+.2}", d))
                    .unwrap_or_else(|| "n/a".to_string()),
                pair.percent_improvement
                    .map(|p| format!("{:+.1}%", p))
                    .unwrap_or_else(|| "n/a".to_string()),
                p_value_cell(pair),
                significance_cell(pair),
            ));
        }
        md.push('\n');
    }
}

fn p_value_cell(pair: &PairwiseComparison) -> String {
    match pair.p_value {
        Some(p) if p < 0.001 => "< 0.001".to_string(),
        Some(p) => format!("{:.3}", p),
        None => "n/a".to_string(),
    }
}

fn significance_cell(pair: &PairwiseComparison) -> String {
    match (&pair.note, pair.significant) {
        (Some(note), _) if note == INSUFFICIENT_SAMPLE => format!("no ({})", note),
        (_, true) => "yes".to_string(),
        (_, false) => "no".to_string(),
    }
}

fn render_pass_rates(report: &AggregateReport, md: &mut String) {
    md.push_str("## Binary checks\n\n");
    let Some(first) = report.pass_rates.first() else {
        return;
    };
    if first.checks.is_empty() {
        md.push_str("No binary checks configured.\n\n");
        return;
    }

    md.push_str("| Variant | Sessions checked |");
    for check in &first.checks {
        md.push_str(&format!(" {} (w={}) |", check.name, check.weight));
    }
    md.push_str(" Weighted | Meets threshold |\n|---|---|");
    for _ in &first.checks {
        md.push_str("---|");
    }
    md.push_str("---|---|\n");

    for variant in &report.pass_rates {
        md.push_str(&format!("| {} | {} |", variant.variant_id, variant.sessions_checked));
        for check in &variant.checks {
            let cell = match check.rate {
                Some(rate) => format!("{:.0}% ({}/{})", rate * 100.0, check.passed, check.total),
                None => "n/a".to_string(),
            };
            md.push_str(&format!(" {} |", cell));
        }
        let weighted = variant
            .weighted_pass_rate
            .map(|r| format!("{:.0}%", r * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        let meets = match variant.meets_threshold {
            Some(true) => "yes",
            Some(false) => "**no**",
            None => "n/a",
        };
        md.push_str(&format!(" {} | {} |\n", weighted, meets));
    }
    md.push('\n');
}

fn render_raw_scores(report: &AggregateReport, md: &mut String) {
    md.push_str("## Raw scores\n\n");
    if report.raw_scores.is_empty() {
        md.push_str("No scores recorded.\n\n");
        return;
    }

    md.push_str("| Variant | Run | Session | Rubric | Overall | Dimensions |\n");
    md.push_str("|---|---|---|---|---|---|\n");
    for row in &report.raw_scores {
        let dimensions = row
            .dimensions
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        let session = if row.partial {
            format!("{} (partial)", row.session_id)
        } else {
            row.session_id.clone()
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            row.variant_id, row.run_index, session, row.rubric, row.overall, dimensions
        ));
    }
    md.push('\n');
}
