//! eval-forge: A/B evaluation harness for AI-generated work.
//!
//! Runs N independent sessions per treatment variant, applies binary
//! checks, scores the output against rubrics through a judge model and
//! compares variants statistically.
//!
//! Pipeline: [`validation`] → [`scheduler`] (using [`runner`]) →
//! [`collector`] → [`judge`] (using [`llm`]) → [`aggregate`].

// Core modules
pub mod aggregate;
pub mod cli;
pub mod collector;
pub mod diagnostics;
pub mod error;
pub mod judge;
pub mod llm;
pub mod runner;
pub mod scheduler;
pub mod spec;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{
    AggregateError, CollectionError, JudgeError, LlmError, SchedulerError, SessionError, SpecError,
};
