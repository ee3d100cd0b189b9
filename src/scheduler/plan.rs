//! Dry-run work plan.
//!
//! Lists what a run would do without contacting the session executor.

use std::fmt::Write as _;

use serde::Serialize;

use super::job::enumerate;
use super::worker_pool::SchedulerConfig;
use crate::spec::EvalSpec;

/// One planned session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSession {
    pub variant_id: String,
    pub run_index: u32,
    pub prompt: String,
}

/// Everything a run of a spec would execute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPlan {
    pub spec_name: String,
    pub spec_digest: String,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub output_dir: String,
    pub sessions: Vec<PlannedSession>,
    pub binary_checks: Vec<String>,
    pub rubrics: Vec<String>,
}

impl WorkPlan {
    pub fn new(spec: &EvalSpec, config: &SchedulerConfig) -> Self {
        let sessions = enumerate(spec)
            .into_iter()
            .map(|item| {
                let prompt = spec
                    .variant(&item.variant_id)
                    .map(|v| spec.composed_prompt(v))
                    .unwrap_or_default();
                PlannedSession {
                    variant_id: item.variant_id,
                    run_index: item.run_index,
                    prompt,
                }
            })
            .collect();

        Self {
            spec_name: spec.name.clone(),
            spec_digest: spec.digest(),
            concurrency: config.concurrency,
            timeout_secs: config.timeout.as_secs(),
            output_dir: config.output_dir.display().to_string(),
            sessions,
            binary_checks: spec.binary_checks.iter().map(|c| c.name.clone()).collect(),
            rubrics: spec.metrics.iter().map(|m| m.rubric.clone()).collect(),
        }
    }

    /// Renders the plan as human-readable text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let short_digest: String = self.spec_digest.chars().take(12).collect();
        let _ = writeln!(out, "Dry run: {} ({})", self.spec_name, short_digest);
        let _ = writeln!(
            out,
            "  {} session(s), concurrency {}, timeout {}s",
            self.sessions.len(),
            self.concurrency,
            self.timeout_secs
        );
        let _ = writeln!(out, "  output: {}", self.output_dir);
        let _ = writeln!(out, "  checks: {}", self.binary_checks.join(", "));
        let _ = writeln!(out, "  rubrics: {}", self.rubrics.join(", "));
        let _ = writeln!(out);
        for (i, session) in self.sessions.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {:>3}. {} run {}: {}",
                i + 1,
                session.variant_id,
                session.run_index,
                truncate(&session.prompt, 80)
            );
        }
        out
    }
}

fn truncate(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        single_line
    } else {
        let cut: String = single_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::types::fixtures::sample_spec;

    #[test]
    fn test_plan_lists_every_session() {
        let spec = sample_spec();
        let plan = WorkPlan::new(&spec, &SchedulerConfig::new("results/wordle"));

        assert_eq!(plan.sessions.len(), 6);
        assert_eq!(plan.sessions[0].prompt, "Build a wordle clone. Use the python skill.");
        assert_eq!(plan.sessions[5].variant_id, "without-skill");
        assert_eq!(plan.sessions[5].run_index, 2);

        let text = plan.render();
        assert!(text.contains("6 session(s), concurrency 2"));
        assert!(text.contains("with-skill run 0"));
        assert!(text.contains("code-quality.md"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a\nb", 10), "a b");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
