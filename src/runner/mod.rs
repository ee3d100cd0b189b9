//! Session runner.
//!
//! Launches agent sessions inside freshly prepared workspaces and runs
//! binary checks against what they leave behind.
//!
//! # Example
//!
//! ```ignore
//! use eval_forge::runner::{CommandSessionExecutor, SessionExecutor};
//!
//! let executor = CommandSessionExecutor::new("claude -p");
//! let outcome = executor.execute(&request).await?;
//! ```

pub mod executor;
pub mod fixture;
pub mod verifier;

pub use executor::{
    CommandSessionExecutor, SessionExecutor, SessionOutcome, SessionRequest, DEFAULT_AGENT_COMMAND,
};
pub use fixture::{copy_tree, prepare_workspace};
pub use verifier::{render_check, CheckResult, CheckRun, CheckRunner, WORKSPACE_PLACEHOLDER};
