//! Serialized oracle calls with retry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::prompt::{read_artifacts, render_prompt, JUDGE_SYSTEM_PROMPT};
use super::rubric::Rubric;
use super::score::{parse_verdict, Score};
use crate::collector::CollectedArtifacts;
use crate::diagnostics::Diagnostics;
use crate::error::{AttemptError, JudgeError};
use crate::llm::{GenerationRequest, LlmProvider, Message};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubled for each later one.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Upper bound on response length requested from the oracle.
const MAX_RESPONSE_TOKENS: u32 = 4000;

/// Held for the whole of every judgment so that at most one oracle call is
/// in flight per process, whatever the number of `Judge` instances.
fn oracle_gate() -> &'static Mutex<()> {
    static GATE: OnceLock<Mutex<()>> = OnceLock::new();
    GATE.get_or_init(|| Mutex::new(()))
}

/// Configuration for the judge.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Oracle model. `None` leaves the choice to the provider.
    pub model: Option<String>,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Render prompts without contacting the oracle.
    pub dry_run: bool,
    /// Extra text shown to the judge under its own heading.
    pub context: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            dry_run: false,
            context: None,
        }
    }
}

impl JudgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Total oracle attempts per rubric.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep before attempt number `attempt` (1-based, so attempt 2 is the
    /// first retry).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// What a single rubric judgment produced.
#[derive(Debug, Clone)]
pub enum JudgeOutcome {
    Scored(Score),
    /// The prompt that would have been sent.
    DryRun { rubric: String, prompt: String },
}

impl JudgeOutcome {
    pub fn rubric(&self) -> &str {
        match self {
            JudgeOutcome::Scored(score) => &score.rubric,
            JudgeOutcome::DryRun { rubric, .. } => rubric,
        }
    }

    pub fn score(&self) -> Option<&Score> {
        match self {
            JudgeOutcome::Scored(score) => Some(score),
            JudgeOutcome::DryRun { .. } => None,
        }
    }
}

/// Result of one rubric within [`Judge::score_all`].
#[derive(Debug)]
pub struct RubricResult {
    pub rubric: String,
    pub outcome: Result<JudgeOutcome, JudgeError>,
    /// Where the score was written, when it was.
    pub path: Option<PathBuf>,
}

/// Scores collected artifacts against rubrics through an oracle.
pub struct Judge {
    provider: Arc<dyn LlmProvider>,
    config: JudgeConfig,
    diagnostics: Diagnostics,
}

impl Judge {
    pub fn new(provider: Arc<dyn LlmProvider>, config: JudgeConfig, diagnostics: Diagnostics) -> Self {
        Self {
            provider,
            config,
            diagnostics,
        }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Judges one session against one rubric.
    ///
    /// Every attempt, including shape and range failures of the response,
    /// is retried up to `max_retries` times with doubling backoff. After the
    /// last attempt the final error is returned inside
    /// [`JudgeError::Exhausted`].
    pub async fn score(
        &self,
        artifacts: &CollectedArtifacts,
        rubric: &Rubric,
    ) -> Result<JudgeOutcome, JudgeError> {
        let files = read_artifacts(artifacts)?;
        let prompt = render_prompt(
            rubric,
            &files,
            self.config.context.as_deref(),
            artifacts.partial,
        )?;
        let request = GenerationRequest::new(
            self.config.model.clone().unwrap_or_default(),
            vec![Message::system(JUDGE_SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(0.0)
        .with_max_tokens(MAX_RESPONSE_TOKENS);

        if self.config.dry_run {
            return Ok(JudgeOutcome::DryRun {
                rubric: rubric.name.clone(),
                prompt: request.flattened_prompt(),
            });
        }

        let _gate = oracle_gate().lock().await;
        let attempts = self.config.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.backoff_for(attempt);
                debug!(
                    rubric = %rubric.name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying judge call"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&request).await {
                Ok((model, verdict)) => {
                    info!(
                        session_id = %artifacts.session_id,
                        rubric = %rubric.name,
                        attempt = attempt,
                        overall = verdict.scores.overall,
                        "Judged session"
                    );
                    return Ok(JudgeOutcome::Scored(Score {
                        rubric: rubric.name.clone(),
                        session_id: artifacts.session_id.clone(),
                        judged_at: Utc::now(),
                        model,
                        files_judged: artifacts.files.clone(),
                        scores: verdict.scores,
                        justification: verdict.justification,
                        strengths: verdict.strengths,
                        weaknesses: verdict.weaknesses,
                        partial: artifacts.partial,
                    }));
                }
                Err(err) => {
                    self.diagnostics.warn(
                        "judge",
                        format!(
                            "Attempt {}/{} for rubric '{}' on session {} failed: {}",
                            attempt, attempts, rubric.name, artifacts.session_id, err
                        ),
                    );
                    last_error = err.to_string();
                }
            }
        }

        Err(JudgeError::Exhausted {
            rubric: rubric.name.clone(),
            attempts,
            last: last_error,
        })
    }

    async fn attempt(
        &self,
        request: &GenerationRequest,
    ) -> Result<(String, super::score::Verdict), AttemptError> {
        let response = self.provider.generate(request.clone()).await?;
        let text = response
            .first_content()
            .ok_or_else(|| AttemptError::Malformed("response has no choices".to_string()))?;
        let verdict = parse_verdict(text)?;
        Ok((response.model, verdict))
    }

    /// Judges one session against every rubric, one after another, and
    /// writes each score under `session_dir/scores/`.
    ///
    /// A failure on one rubric is reported in its [`RubricResult`] and does
    /// not stop the remaining rubrics.
    pub async fn score_all(
        &self,
        artifacts: &CollectedArtifacts,
        rubrics: &[Rubric],
        session_dir: &Path,
    ) -> Vec<RubricResult> {
        let mut results = Vec::with_capacity(rubrics.len());

        for rubric in rubrics {
            let outcome = self.score(artifacts, rubric).await;
            let (outcome, path) = match outcome {
                Ok(JudgeOutcome::Scored(score)) => match score.save(session_dir) {
                    Ok(path) => (Ok(JudgeOutcome::Scored(score)), Some(path)),
                    Err(err) => (Err(err), None),
                },
                other => (other, None),
            };
            if let Err(ref err) = outcome {
                warn!(
                    session_id = %artifacts.session_id,
                    rubric = %rubric.name,
                    error = %err,
                    "Rubric not scored"
                );
            }
            results.push(RubricResult {
                rubric: rubric.name.clone(),
                outcome,
                path,
            });
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Replays queued responses and records peak concurrency.
    struct MockLlmProvider {
        responses: StdMutex<VecDeque<Result<String, LlmError>>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl MockLlmProvider {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(r#"{"overall": 3}"#.to_string()));
            next.map(|text| GenerationResponse {
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

    fn artifacts(temp: &TempDir) -> CollectedArtifacts {
        let dir = temp.path().join("s1/workspace");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("game.py"), "print('wordle')\n").unwrap();
        CollectedArtifacts {
            session_id: "s1".to_string(),
            source: temp.path().join("s1/sandbox"),
            dir,
            files: vec!["game.py".to_string()],
            patterns: vec!["**/*.py".to_string()],
            partial: false,
            collected_at: Utc::now(),
        }
    }

    fn rubric(name: &str) -> Rubric {
        Rubric {
            name: name.to_string(),
            path: PathBuf::from(format!("rubrics/{}.md", name)),
            content: "5: great\n1: broken".to_string(),
        }
    }

    fn fast_config() -> JudgeConfig {
        JudgeConfig::new().with_backoff_base(Duration::from_millis(1))
    }

    #[test]
    fn test_config_defaults_and_backoff() {
        let config = JudgeConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.attempts(), 4);
        assert!(!config.dry_run);
        assert_eq!(config.backoff_for(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_score_parses_response() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![Ok(
            r#"{"overall": 4, "dimensions": {"clarity": 5}, "justification": "tidy"}"#.to_string(),
        )]));
        let judge = Judge::new(provider, fast_config(), Diagnostics::new());

        let outcome = judge.score(&artifacts(&temp), &rubric("code-quality")).await.unwrap();
        let score = outcome.score().unwrap();
        assert_eq!(score.rubric, "code-quality");
        assert_eq!(score.session_id, "s1");
        assert_eq!(score.model, "mock-judge");
        assert_eq!(score.files_judged, vec!["game.py"]);
        assert_eq!(score.scores.overall, 4);
        assert_eq!(score.scores.dimensions["clarity"], 5);
    }

    #[tokio::test]
    async fn test_malformed_and_out_of_range_are_retried() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![
            Ok("not json".to_string()),
            Ok(r#"{"overall": 7}"#.to_string()),
            Err(LlmError::RateLimited("slow down".to_string())),
            Ok(r#"{"overall": 2}"#.to_string()),
        ]));
        let diagnostics = Diagnostics::new();
        let judge = Judge::new(provider.clone(), fast_config(), diagnostics.clone());

        let outcome = judge.score(&artifacts(&temp), &rubric("ux")).await.unwrap();
        assert_eq!(outcome.score().unwrap().scores.overall, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(diagnostics.messages_for("judge").len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_carries_last_error() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![
            Err(LlmError::RequestFailed("boom".to_string())),
            Err(LlmError::RequestFailed("still down".to_string())),
        ]));
        let judge = Judge::new(provider.clone(), fast_config().with_max_retries(1), Diagnostics::new());

        let err = judge.score(&artifacts(&temp), &rubric("ux")).await.unwrap_err();
        match err {
            JudgeError::Exhausted {
                rubric,
                attempts,
                last,
            } => {
                assert_eq!(rubric, "ux");
                assert_eq!(attempts, 2);
                assert!(last.contains("still down"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_call_oracle() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let judge = Judge::new(
            provider.clone(),
            fast_config().with_dry_run(true).with_context("Wordle task"),
            Diagnostics::new(),
        );

        let outcome = judge.score(&artifacts(&temp), &rubric("ux")).await.unwrap();
        match outcome {
            JudgeOutcome::DryRun { rubric, prompt } => {
                assert_eq!(rubric, "ux");
                assert!(prompt.contains(JUDGE_SYSTEM_PROMPT));
                assert!(prompt.contains("print('wordle')"));
                assert!(prompt.contains("Wordle task"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_score_all_isolates_rubric_failures() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![
            Ok(r#"{"overall": 5}"#.to_string()),
            Err(LlmError::RequestFailed("down".to_string())),
            Err(LlmError::RequestFailed("down".to_string())),
            Ok(r#"{"overall": 1}"#.to_string()),
        ]));
        let judge = Judge::new(provider, fast_config().with_max_retries(1), Diagnostics::new());
        let rubrics = vec![rubric("first"), rubric("second"), rubric("third")];
        let session_dir = temp.path().join("s1");

        let results = judge
            .score_all(&artifacts(&temp), &rubrics, &session_dir)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_ok());
        assert!(matches!(
            results[1].outcome,
            Err(JudgeError::Exhausted { .. })
        ));
        assert!(results[2].outcome.is_ok());
        assert!(session_dir.join("scores/first.json").exists());
        assert!(!session_dir.join("scores/second.json").exists());
        let third = Score::load(&session_dir.join("scores/third.json")).unwrap();
        assert_eq!(third.scores.overall, 1);
    }

    #[tokio::test]
    async fn test_concurrent_judges_are_serialized() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new(vec![]).with_delay(Duration::from_millis(20)));
        let artifacts = Arc::new(artifacts(&temp));

        let mut handles = Vec::new();
        for i in 0..4 {
            let judge = Judge::new(provider.clone(), fast_config(), Diagnostics::new());
            let artifacts = artifacts.clone();
            handles.push(tokio::spawn(async move {
                judge.score(&artifacts, &rubric(&format!("r{}", i))).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }
}
