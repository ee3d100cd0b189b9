//! Session scheduling with a bounded worker pool.
//!
//! - **WorkItem**: one `(variant, run index)` pair, enumerated in spec order
//! - **WorkQueue**: the single in-process queue every worker pulls from
//! - **SessionScheduler**: runs the items with bounded concurrency and a
//!   per-session timeout, then runs binary checks
//! - **RunManifest**: `sessions.json`, rewritten atomically on every state
//!   transition
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!                  │  enumerate   │
//!                  │ (spec order) │
//!                  └──────┬───────┘
//!                         │
//!                  ┌──────▼───────┐
//!                  │  WorkQueue   │
//!                  └──────┬───────┘
//!                         │
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    ┌─────────┐     ┌─────────┐     ┌─────────┐
//!    │ Worker 1│     │ Worker 2│     │ Worker N│
//!    └────┬────┘     └────┬────┘     └────┬────┘
//!         └───────────────┼───────────────┘
//!                  ┌──────▼───────┐
//!                  │ sessions.json│
//!                  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eval_forge::scheduler::{SchedulerConfig, SessionScheduler};
//! use eval_forge::runner::CommandSessionExecutor;
//!
//! let config = SchedulerConfig::new("results/wordle").with_concurrency(4);
//! let scheduler = SessionScheduler::new(
//!     config,
//!     Arc::new(CommandSessionExecutor::new("claude -p")),
//!     diagnostics,
//! );
//! let manifest = scheduler.run(&validated).await?;
//! println!("{}", manifest.summary());
//! ```

pub mod job;
pub mod manifest;
pub mod plan;
pub mod queue;
pub mod worker_pool;

pub use job::{enumerate, SessionRun, SessionStatus, WorkItem};
pub use manifest::{ManifestWriter, RunManifest, RunSummary, WeightEntry, MANIFEST_FILE};
pub use plan::{PlannedSession, WorkPlan};
pub use queue::WorkQueue;
pub use worker_pool::{
    SchedulerConfig, SessionScheduler, DEFAULT_CONCURRENCY, DEFAULT_SESSION_TIMEOUT, SANDBOX_DIR,
    TRANSCRIPT_FILE,
};
