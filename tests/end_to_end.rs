//! Full pipeline over mock collaborators: schedule, check, collect, judge
//! and aggregate a two-variant spec.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use eval_forge::aggregate::{aggregate_run, AggregateOptions, ReportFormat};
use eval_forge::collector::{CollectedArtifacts, ResultsCollector};
use eval_forge::diagnostics::Diagnostics;
use eval_forge::error::{CollectionError, LlmError, SessionError};
use eval_forge::judge::{self, Judge, JudgeConfig, JudgeOutcome, Score};
use eval_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use eval_forge::runner::{SessionExecutor, SessionOutcome, SessionRequest};
use eval_forge::scheduler::{RunManifest, SchedulerConfig, SessionScheduler, SessionStatus};
use eval_forge::validation::{SpecValidator, ValidatedSpec};

/// Writes a small program into the workspace; `hang_variant` never finishes.
struct MockExecutor {
    hang_variant: Option<String>,
    launched: AtomicUsize,
}

impl MockExecutor {
    fn new() -> Self {
        Self {
            hang_variant: None,
            launched: AtomicUsize::new(0),
        }
    }

    fn hanging(variant: &str) -> Self {
        Self {
            hang_variant: Some(variant.to_string()),
            launched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionExecutor for MockExecutor {
    async fn execute(&self, request: &SessionRequest) -> Result<SessionOutcome, SessionError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(&request.workspace)?;
        fs::write(
            request.workspace.join("game.py"),
            format!("# variant: {}\nprint('wordle')\n", request.variant_id),
        )?;
        fs::write(request.workspace.join("notes.txt"), "not collected")?;

        if self.hang_variant.as_deref() == Some(request.variant_id.as_str()) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(SessionOutcome {
            stdout: format!("done: {}", request.prompt),
            ..Default::default()
        })
    }
}

/// Scores treatment work 4 and control work 2 on every rubric.
struct MockJudgeOracle {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for MockJudgeOracle {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.flattened_prompt();
        let overall = if prompt.contains("# variant: treatment") { 4 } else { 2 };
        let text = format!(
            "```json\n{{\"overall\": {}, \"dimensions\": {{\"clarity\": {}}}, \"justification\": \"ok\"}}\n```",
            overall, overall
        );
        Ok(GenerationResponse {
            id: "mock".to_string(),
            model: "mock-judge".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

fn raw_spec() -> Value {
    json!({
        "name": "wordle",
        "version": "1.0",
        "fixture": { "repo": "./fixtures/empty" },
        "prompt": "Build a wordle clone.",
        "variants": [
            { "id": "treatment", "suffix": " Use the python skill." },
            { "name": "control", "promptSuffix": "" }
        ],
        "runsPerVariant": 3,
        "binaryChecks": [
            { "name": "has-game", "checkTemplate": "test -f {workspace}/game.py", "weight": 0.5 },
            { "name": "has-readme", "checkTemplate": "test -f {workspace}/README.md", "weight": 0.5 }
        ],
        "metrics": [
            { "name": "quality", "rubric": "code-quality.md", "weight": 0.6 },
            { "name": "ux", "rubric": "ux.md", "weight": 0.4 }
        ],
        "acceptance": { "significanceThreshold": 0.05, "minimumMeanDifference": 1.0 },
        "collect": ["**/*.py"]
    })
}

fn validated() -> ValidatedSpec {
    SpecValidator::default().validate(&raw_spec()).unwrap()
}

fn write_rubrics(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("code-quality.md"), "5: idiomatic\n1: broken").unwrap();
    fs::write(dir.join("ux.md"), "5: delightful\n1: unusable").unwrap();
}

async fn run(executor: MockExecutor, run_dir: &Path, timeout: Duration) -> RunManifest {
    let config = SchedulerConfig::new(run_dir)
        .with_concurrency(2)
        .with_timeout(timeout)
        .with_quiet(true);
    SessionScheduler::new(config, Arc::new(executor), Diagnostics::new())
        .run(&validated())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_pipeline() {
    let temp = TempDir::new().unwrap();
    let run_dir = temp.path().join("run");
    let rubrics_dir = temp.path().join("rubrics");
    write_rubrics(&rubrics_dir);

    // Schedule
    let manifest = run(MockExecutor::new(), &run_dir, Duration::from_secs(30)).await;
    assert_eq!(manifest.sessions.len(), 6);
    assert_eq!(manifest.summary().completed, 6);
    assert_eq!(manifest.summary().exit_code(), 0);

    let on_disk = RunManifest::load(&run_dir).unwrap();
    assert_eq!(on_disk.sessions.len(), 6);
    for session in &on_disk.sessions {
        assert_eq!(session.status, SessionStatus::Completed);
        let checks = &session.binary_check_results;
        assert_eq!(checks.len(), 2);
        assert!(checks[0].passed);
        assert!(!checks[1].passed);
    }

    // Collected automatically: only the python file
    let session_ids: Vec<String> = on_disk
        .sessions
        .iter()
        .filter_map(|s| s.session_id.clone())
        .collect();
    for id in &session_ids {
        let artifacts = CollectedArtifacts::load(&run_dir.join(id)).unwrap();
        assert_eq!(artifacts.files, vec!["game.py"]);
        assert!(!artifacts.partial);
    }

    // Judge every session against every rubric
    let oracle = Arc::new(MockJudgeOracle {
        calls: AtomicUsize::new(0),
    });
    let judge = Judge::new(
        oracle.clone(),
        JudgeConfig::new().with_backoff_base(Duration::from_millis(1)),
        Diagnostics::new(),
    );
    let rubrics = judge::load_all(&on_disk.spec, &rubrics_dir).unwrap();
    for id in &session_ids {
        let session_dir = run_dir.join(id);
        let artifacts = CollectedArtifacts::load(&session_dir).unwrap();
        let results = judge.score_all(&artifacts, &rubrics, &session_dir).await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, Ok(JudgeOutcome::Scored(_)))));
        assert!(session_dir.join("scores/code-quality.json").exists());
        assert!(session_dir.join("scores/ux.json").exists());
    }
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 12);

    let sample = Score::load(&run_dir.join(&session_ids[0]).join("scores/ux.json")).unwrap();
    assert_eq!(sample.model, "mock-judge");
    assert_eq!(sample.files_judged, vec!["game.py"]);

    // Aggregate
    let options = AggregateOptions::new().with_format(ReportFormat::Both);
    let output = aggregate_run(&run_dir, &options, &Diagnostics::new()).unwrap();
    assert_eq!(output.written.len(), 2);
    assert!(run_dir.join("report.md").exists());
    assert!(run_dir.join("report.json").exists());

    let report = &output.report;
    assert_eq!(report.raw_scores.len(), 12);
    for comparison in &report.comparisons {
        let pair = &comparison.pairs[0];
        assert_eq!(pair.first, "treatment");
        assert_eq!(pair.second, "control");
        assert!((pair.mean_difference.unwrap() - 2.0).abs() < 1e-9);
        assert!(pair.significant, "rubric {} not significant", comparison.rubric);
    }
    let treatment = &report.pass_rates[0];
    assert_eq!(treatment.sessions_checked, 3);
    assert!((treatment.weighted_pass_rate.unwrap() - 0.5).abs() < 1e-9);

    let markdown = fs::read_to_string(run_dir.join("report.md")).unwrap();
    assert!(markdown.contains("| treatment vs control | +2.00 | +100.0% | < 0.001 | yes |"));

    // Re-running over the same directory reproduces the report exactly
    let first_json = fs::read(run_dir.join("report.json")).unwrap();
    aggregate_run(&run_dir, &options, &Diagnostics::new()).unwrap();
    assert_eq!(fs::read(run_dir.join("report.json")).unwrap(), first_json);
}

#[tokio::test]
async fn test_timed_out_sessions_skip_checks_and_collection() {
    let temp = TempDir::new().unwrap();
    let run_dir = temp.path().join("run");

    let manifest = run(
        MockExecutor::hanging("control"),
        &run_dir,
        Duration::from_millis(500),
    )
    .await;

    let summary = manifest.summary();
    assert_eq!(summary.total, 6);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.timed_out, 3);
    assert_eq!(summary.exit_code(), 124);

    let collector = ResultsCollector::new(&manifest.spec.collect, Diagnostics::new()).unwrap();
    for session in manifest.sessions.iter().filter(|s| s.variant_id == "control") {
        assert_eq!(session.status, SessionStatus::TimedOut);
        assert!(session.binary_check_results.is_empty());

        let session_dir = run_dir.join(session.session_id.as_deref().unwrap());
        assert!(CollectedArtifacts::load(&session_dir).is_err());

        let refused = collector.collect_session(session, &run_dir, false);
        assert!(matches!(
            refused,
            Err(CollectionError::IncompleteSession { .. })
        ));

        let forced = collector.collect_session(session, &run_dir, true).unwrap();
        assert!(forced.partial);
        assert_eq!(forced.files, vec!["game.py"]);
    }
}

#[tokio::test]
async fn test_dry_run_judging_renders_prompt_without_oracle() {
    let temp = TempDir::new().unwrap();
    let run_dir = temp.path().join("run");
    let rubrics_dir = temp.path().join("rubrics");
    write_rubrics(&rubrics_dir);

    let manifest = run(MockExecutor::new(), &run_dir, Duration::from_secs(30)).await;
    let session_id = manifest.sessions[0].session_id.clone().unwrap();
    let session_dir = run_dir.join(&session_id);

    let oracle = Arc::new(MockJudgeOracle {
        calls: AtomicUsize::new(0),
    });
    let judge = Judge::new(
        oracle.clone(),
        JudgeConfig::new().with_dry_run(true),
        Diagnostics::new(),
    );
    let rubrics = judge::load_all(&manifest.spec, &rubrics_dir).unwrap();
    let artifacts = CollectedArtifacts::load(&session_dir).unwrap();

    let results = judge.score_all(&artifacts, &rubrics, &session_dir).await;
    assert_eq!(results.len(), 2);
    match &results[0].outcome {
        Ok(JudgeOutcome::DryRun { prompt, .. }) => {
            assert!(prompt.contains("5: idiomatic"));
            assert!(prompt.contains("# variant: treatment"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    assert!(!session_dir.join("scores").exists());
}
