//! Rubric-based judging of collected session artifacts.
//!
//! A [`Judge`] renders one prompt per rubric from the rubric text and the
//! verbatim collected files, sends it to an [`LlmProvider`](crate::llm::LlmProvider)
//! and validates the structured answer into a [`Score`].
//!
//! Oracle calls are serialized process-wide: however many judges exist,
//! one request is in flight at a time. Failed attempts (transport errors,
//! unparseable answers, scores outside 1..=5) are retried with doubling
//! backoff until `max_retries` is used up.
//!
//! Scores are written to `<runDir>/<sessionId>/scores/<rubric>.json`.

pub mod prompt;
pub mod rubric;
pub mod score;
pub mod service;

pub use prompt::{read_artifacts, render_prompt, ArtifactFile, JUDGE_SYSTEM_PROMPT};
pub use rubric::{load_all, Rubric};
pub use score::{parse_verdict, Score, ScoreValues, Verdict, MAX_SCORE, MIN_SCORE, SCORES_DIR};
pub use service::{
    Judge, JudgeConfig, JudgeOutcome, RubricResult, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES,
};
