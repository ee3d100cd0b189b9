//! Command-line interface for eval-forge.
//!
//! Provides the `validate`, `run`, `collect`, `judge` and `aggregate`
//! commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
