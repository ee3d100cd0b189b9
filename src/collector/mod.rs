//! Results collection.
//!
//! Extracts the files a judge should see from a session workspace into
//! `<runDir>/<sessionId>/workspace`, preserving relative structure. Only
//! completed sessions are collected unless collection is forced, in which
//! case the result is marked partial.

pub mod results_collector;

pub use results_collector::{CollectedArtifacts, ResultsCollector, ARTIFACTS_DIR, SIDECAR_FILE};
