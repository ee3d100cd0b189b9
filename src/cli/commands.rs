//! CLI command definitions for eval-forge.
//!
//! Each subcommand maps onto one pipeline stage: `validate` and `run`
//! (SpecValidator + SessionScheduler), `collect` (ResultsCollector),
//! `judge` (Judge) and `aggregate` (Aggregator). Every stage reads and
//! writes the same run directory, so they can be re-run independently.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use crate::aggregate::{aggregate_run, AggregateOptions, ReportFormat};
use crate::collector::{CollectedArtifacts, ResultsCollector};
use crate::diagnostics::Diagnostics;
use crate::error::CollectionError;
use crate::judge::{self, Judge, JudgeConfig, JudgeOutcome, Rubric, DEFAULT_MAX_RETRIES};
use crate::llm::{CommandProvider, LiteLlmClient, LlmProvider, DEFAULT_JUDGE_MODEL};
use crate::runner::{CommandSessionExecutor, DEFAULT_AGENT_COMMAND};
use crate::scheduler::{
    RunManifest, SchedulerConfig, SessionRun, SessionScheduler, WorkPlan, DEFAULT_CONCURRENCY,
};
use crate::validation::{load_and_validate, ValidatedSpec};

/// Parent directory of generated run directories.
const DEFAULT_RESULTS_DIR: &str = "results";

/// Default rubric directory, relative to the working directory.
const DEFAULT_RUBRICS_DIR: &str = "rubrics";

/// Default per-session timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Fallback oracle address used for dry runs without `LITELLM_API_BASE`.
const DRY_RUN_API_BASE: &str = "http://localhost:4000";

/// A/B evaluation harness for AI-generated work.
#[derive(Parser)]
#[command(name = "eval-forge")]
#[command(about = "Run treatment variants, check and judge their output, and compare them statistically")]
#[command(version)]
#[command(
    long_about = "eval-forge runs N sessions per variant of an eval spec, applies binary checks, scores the output against rubrics with a judge model and compares variants with Welch's t-test.\n\nExample usage:\n  eval-forge run evals/wordle.yaml --parallel 4\n  eval-forge collect --run-dir results/wordle_2026-01-01_12-00-00\n  eval-forge judge --run-dir results/wordle_2026-01-01_12-00-00 --all\n  eval-forge aggregate results/wordle_2026-01-01_12-00-00 --format both"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

impl Cli {
    /// Log filter for this invocation: `--quiet` on `run` lowers the
    /// default level to `warn`.
    pub fn effective_log_level(&self) -> String {
        match &self.command {
            Commands::Run(args) if args.quiet && self.log_level == "info" => "warn".to_string(),
            _ => self.log_level.clone(),
        }
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Validate an eval spec and report every violation.
    Validate(ValidateArgs),

    /// Run every (variant, run) session of an eval spec.
    Run(RunArgs),

    /// Copy judged artifacts out of session workspaces.
    Collect(CollectArgs),

    /// Score collected artifacts against rubrics.
    Judge(JudgeArgs),

    /// Compute statistics and render the comparison report.
    #[command(alias = "report")]
    Aggregate(AggregateArgs),
}

/// Arguments for the validate command.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Eval spec file (YAML or JSON).
    pub spec: PathBuf,

    /// Directory containing rubric files; enables rubric existence checks.
    #[arg(long)]
    pub rubrics_dir: Option<PathBuf>,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Eval spec file (YAML or JSON).
    pub spec: PathBuf,

    /// Number of sessions run concurrently.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY, conflicts_with = "sequential")]
    pub parallel: usize,

    /// Run one session at a time (same as --parallel 1).
    #[arg(long)]
    pub sequential: bool,

    /// Run directory. Defaults to results/<spec name>_<timestamp>.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Per-session timeout in seconds.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Validate and print the work plan without launching sessions.
    #[arg(long)]
    pub dry_run: bool,

    /// Suppress progress output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Agent command; receives the prompt on stdin inside the workspace.
    #[arg(long, env = "EVAL_AGENT_COMMAND", default_value = DEFAULT_AGENT_COMMAND)]
    pub agent_command: String,

    /// Directory containing rubric files; enables rubric existence checks.
    #[arg(long)]
    pub rubrics_dir: Option<PathBuf>,

    /// Do not collect artifacts of completed sessions automatically.
    #[arg(long)]
    pub no_collect: bool,
}

/// Arguments for the collect command.
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Run directory containing sessions.json.
    #[arg(long)]
    pub run_dir: PathBuf,

    /// Collect a single session (default: every session).
    #[arg(long)]
    pub session: Option<String>,

    /// Collect sessions that did not complete; results are flagged partial.
    #[arg(long)]
    pub force: bool,

    /// Glob pattern of files to collect (repeatable). Defaults to the spec's `collect` list.
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,
}

/// Arguments for the judge command.
#[derive(Parser, Debug)]
pub struct JudgeArgs {
    /// Run directory containing sessions.json.
    #[arg(long)]
    pub run_dir: PathBuf,

    /// Judge a single session (default: every collected session).
    #[arg(long)]
    pub session: Option<String>,

    /// Directory containing rubric files.
    #[arg(long, default_value = DEFAULT_RUBRICS_DIR)]
    pub rubrics_dir: PathBuf,

    /// Judge against every rubric of the spec's metrics.
    #[arg(long, conflicts_with = "rubric")]
    pub all: bool,

    /// Single rubric file to judge against.
    #[arg(long)]
    pub rubric: Option<PathBuf>,

    /// Retries after a failed oracle attempt.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub retries: u32,

    /// Print the prompts instead of calling the oracle.
    #[arg(long)]
    pub dry_run: bool,

    /// File whose content is shown to the judge as context.
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Judge model (default: the oracle's default).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Judge with a CLI oracle that reads the prompt on stdin instead of the HTTP API.
    #[arg(long, env = "EVAL_JUDGE_COMMAND")]
    pub judge_command: Option<String>,
}

/// Arguments for the aggregate command.
#[derive(Parser, Debug)]
pub struct AggregateArgs {
    /// Run directory containing sessions.json.
    pub run_dir: PathBuf,

    /// Report file (default: <run dir>/report.md or report.json).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Markdown)]
    pub format: ReportFormat,

    /// Significance threshold, overriding the spec's acceptance value.
    #[arg(long)]
    pub significance: Option<f64>,
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments and return the process exit code.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<u8> {
    let diagnostics = Diagnostics::new();
    match cli.command {
        Commands::Validate(args) => run_validate_command(args, &diagnostics),
        Commands::Run(args) => run_run_command(args, &diagnostics).await,
        Commands::Collect(args) => run_collect_command(args, &diagnostics),
        Commands::Judge(args) => run_judge_command(args, &diagnostics).await,
        Commands::Aggregate(args) => run_aggregate_command(args, &diagnostics),
    }
}

// ============================================================================
// Validate / Run
// ============================================================================

fn load_spec(
    spec: &Path,
    rubrics_dir: Option<&Path>,
    diagnostics: &Diagnostics,
) -> anyhow::Result<ValidatedSpec> {
    load_and_validate(spec, rubrics_dir, diagnostics)
        .with_context(|| format!("Rejected eval spec '{}'", spec.display()))
}

fn run_validate_command(args: ValidateArgs, diagnostics: &Diagnostics) -> anyhow::Result<u8> {
    let validated = load_spec(&args.spec, args.rubrics_dir.as_deref(), diagnostics)?;
    let spec = &validated.spec;

    println!(
        "Eval spec '{}' v{} is valid: {} variant(s) x {} run(s) = {} session(s), {} binary check(s), {} metric(s)",
        spec.name,
        spec.version,
        spec.variants.len(),
        spec.runs_per_variant,
        spec.total_sessions(),
        spec.binary_checks.len(),
        spec.metrics.len()
    );
    for warning in &validated.warnings {
        println!("  warning: {}", warning);
    }
    Ok(0)
}

fn default_run_dir(spec_name: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    PathBuf::from(DEFAULT_RESULTS_DIR).join(format!("{}_{}", spec_name, stamp))
}

async fn run_run_command(args: RunArgs, diagnostics: &Diagnostics) -> anyhow::Result<u8> {
    let validated = load_spec(&args.spec, args.rubrics_dir.as_deref(), diagnostics)?;

    let concurrency = if args.sequential { 1 } else { args.parallel };
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| default_run_dir(&validated.spec.name));
    let config = SchedulerConfig::new(output_dir)
        .with_concurrency(concurrency)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_quiet(args.quiet)
        .with_auto_collect(!args.no_collect);

    if args.dry_run {
        print!("{}", WorkPlan::new(&validated.spec, &config).render());
        return Ok(0);
    }

    info!(
        spec = %validated.spec.name,
        sessions = validated.spec.total_sessions(),
        concurrency = config.concurrency,
        output_dir = %config.output_dir.display(),
        "Starting run"
    );

    let executor = Arc::new(CommandSessionExecutor::new(&args.agent_command));
    let scheduler = SessionScheduler::new(config.clone(), executor, diagnostics.clone());
    let manifest = scheduler.run(&validated).await?;

    let summary = manifest.summary();
    println!("{}", summary);
    println!("Run directory: {}", config.output_dir.display());
    Ok(summary.exit_code() as u8)
}

// ============================================================================
// Collect
// ============================================================================

/// Sessions selected by `--session`, or every launched session.
fn select_sessions<'a>(
    manifest: &'a RunManifest,
    session: Option<&str>,
) -> anyhow::Result<Vec<&'a SessionRun>> {
    match session {
        Some(id) => {
            let run = manifest
                .session(id)
                .with_context(|| format!("Session '{}' is not in the run manifest", id))?;
            Ok(vec![run])
        }
        None => Ok(manifest
            .sessions
            .iter()
            .filter(|s| s.session_id.is_some())
            .collect()),
    }
}

fn run_collect_command(args: CollectArgs, diagnostics: &Diagnostics) -> anyhow::Result<u8> {
    let manifest = RunManifest::load(&args.run_dir)?;
    let patterns = if args.patterns.is_empty() {
        manifest.spec.collect.clone()
    } else {
        args.patterns.clone()
    };
    let collector = ResultsCollector::new(&patterns, diagnostics.clone())?;
    let sessions = select_sessions(&manifest, args.session.as_deref())?;

    let mut collected = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for session in sessions {
        match collector.collect_session(session, &args.run_dir, args.force) {
            Ok(artifacts) => {
                collected += 1;
                println!(
                    "{}: {} file(s){}",
                    artifacts.session_id,
                    artifacts.files.len(),
                    if artifacts.partial { " (partial)" } else { "" }
                );
            }
            Err(CollectionError::IncompleteSession { session_id, status })
                if args.session.is_none() =>
            {
                skipped += 1;
                info!(session_id = %session_id, status = %status, "Skipping unfinished session");
            }
            Err(e) => {
                failed += 1;
                eprintln!("Error: {}", e);
            }
        }
    }

    println!(
        "Collected {} session(s), skipped {} unfinished, {} failed",
        collected, skipped, failed
    );
    Ok(if failed > 0 { 1 } else { 0 })
}

// ============================================================================
// Judge
// ============================================================================

fn build_provider(args: &JudgeArgs) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(command) = &args.judge_command {
        let label = args.model.clone().unwrap_or_else(|| command.clone());
        return Ok(Arc::new(CommandProvider::new(command, label)));
    }
    match LiteLlmClient::from_env() {
        Ok(client) => Ok(Arc::new(client)),
        Err(e) if args.dry_run => {
            warn!(error = %e, "No oracle configured; dry run will not contact one");
            Ok(Arc::new(LiteLlmClient::new(
                DRY_RUN_API_BASE,
                None,
                DEFAULT_JUDGE_MODEL,
            )?))
        }
        Err(e) => Err(e).context("Configure the HTTP oracle or pass --judge-command"),
    }
}

async fn run_judge_command(args: JudgeArgs, diagnostics: &Diagnostics) -> anyhow::Result<u8> {
    let manifest = RunManifest::load(&args.run_dir)?;

    let rubrics: Vec<Rubric> = if args.all {
        judge::load_all(&manifest.spec, &args.rubrics_dir)?
    } else if let Some(path) = &args.rubric {
        vec![Rubric::from_file(path)?]
    } else {
        bail!("Pass --all to judge every metric rubric, or --rubric FILE for a single one");
    };

    let mut config = JudgeConfig::new()
        .with_max_retries(args.retries)
        .with_dry_run(args.dry_run);
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    if let Some(path) = &args.context {
        let context = fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file '{}'", path.display()))?;
        config = config.with_context(context);
    }

    let judge = Judge::new(build_provider(&args)?, config, diagnostics.clone());
    let sessions = select_sessions(&manifest, args.session.as_deref())?;

    let mut scored = 0usize;
    let mut failed = 0usize;
    for session in sessions {
        let Some(session_id) = session.session_id.as_deref() else {
            continue;
        };
        let session_dir = args.run_dir.join(session_id);
        let artifacts = match CollectedArtifacts::load(&session_dir) {
            Ok(artifacts) => artifacts,
            Err(e) if args.session.is_none() => {
                info!(session_id = %session_id, error = %e, "Skipping uncollected session");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Session '{}' has no collected artifacts", session_id)
                })
            }
        };

        for result in judge.score_all(&artifacts, &rubrics, &session_dir).await {
            match result.outcome {
                Ok(JudgeOutcome::Scored(score)) => {
                    scored += 1;
                    println!(
                        "{} [{}] {}: overall {}",
                        session_id, session.variant_id, score.rubric, score.scores.overall
                    );
                }
                Ok(JudgeOutcome::DryRun { rubric, prompt }) => {
                    println!("===== {} / {} =====\n{}", session_id, rubric, prompt);
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("Error: {} / {}: {}", session_id, result.rubric, e);
                }
            }
        }
    }

    if !args.dry_run {
        println!("Scored {} rubric judgment(s), {} failed", scored, failed);
    }
    Ok(if failed > 0 { 1 } else { 0 })
}

// ============================================================================
// Aggregate
// ============================================================================

fn run_aggregate_command(args: AggregateArgs, diagnostics: &Diagnostics) -> anyhow::Result<u8> {
    let mut options = AggregateOptions::new().with_format(args.format);
    if let Some(output) = &args.output {
        options = options.with_output(output);
    }
    if let Some(threshold) = args.significance {
        if !(threshold > 0.0 && threshold < 1.0) {
            bail!("--significance must be between 0 and 1, got {}", threshold);
        }
        options = options.with_significance(threshold);
    }

    let output = aggregate_run(&args.run_dir, &options, diagnostics)?;

    for comparison in &output.report.comparisons {
        for pair in &comparison.pairs {
            if pair.significant {
                println!(
                    "{}: {} vs {} differs significantly (p = {:.4})",
                    comparison.rubric,
                    pair.first,
                    pair.second,
                    pair.p_value.unwrap_or_default()
                );
            }
        }
    }
    for path in &output.written {
        println!("Report written to {}", path.display());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["eval-forge", "run", "spec.yaml"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.parallel, DEFAULT_CONCURRENCY);
                assert_eq!(args.timeout, 600);
                assert!(!args.sequential);
                assert!(!args.dry_run);
                assert!(args.output_dir.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_sequential_conflicts_with_parallel() {
        assert!(Cli::try_parse_from(["eval-forge", "run", "s.yaml", "--sequential", "--parallel", "3"]).is_err());
        assert!(Cli::try_parse_from(["eval-forge", "run", "s.yaml", "--sequential"]).is_ok());
    }

    #[test]
    fn test_quiet_lowers_log_level() {
        let cli = Cli::try_parse_from(["eval-forge", "run", "s.yaml", "--quiet"]).unwrap();
        assert_eq!(cli.effective_log_level(), "warn");

        let cli =
            Cli::try_parse_from(["eval-forge", "run", "s.yaml", "--quiet", "--log-level", "debug"])
                .unwrap();
        assert_eq!(cli.effective_log_level(), "debug");
    }

    #[test]
    fn test_judge_and_aggregate_flags() {
        let cli = Cli::try_parse_from([
            "eval-forge", "judge", "--run-dir", "r", "--all", "--retries", "5", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Judge(args) => {
                assert!(args.all);
                assert_eq!(args.retries, 5);
                assert!(args.dry_run);
                assert_eq!(args.rubrics_dir, PathBuf::from("rubrics"));
            }
            _ => panic!("expected judge"),
        }

        let cli = Cli::try_parse_from([
            "eval-forge", "aggregate", "r", "--format", "both", "--significance", "0.01",
        ])
        .unwrap();
        match cli.command {
            Commands::Aggregate(args) => {
                assert_eq!(args.format, ReportFormat::Both);
                assert_eq!(args.significance, Some(0.01));
            }
            _ => panic!("expected aggregate"),
        }
    }

    #[test]
    fn test_default_run_dir() {
        let dir = default_run_dir("wordle");
        assert!(dir.starts_with("results"));
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("wordle_"));
        assert_eq!(name.len(), "wordle_".len() + "2026-01-01_12-00-00".len());
    }
}
