//! Bounded worker pool executing session runs.
//!
//! A fixed number of workers pull work items from one shared queue. Each
//! worker launches the session through the [`SessionExecutor`], enforces the
//! per-session time budget, runs the binary checks and records every state
//! transition in the run manifest.
//!
//! Per-item failures are recorded on the item and never abort the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{enumerate, SessionStatus, WorkItem};
use super::manifest::{ManifestWriter, RunManifest};
use super::queue::WorkQueue;
use crate::collector::{ResultsCollector, ARTIFACTS_DIR};
use crate::diagnostics::Diagnostics;
use crate::error::SchedulerError;
use crate::runner::{CheckRunner, SessionExecutor, SessionOutcome, SessionRequest};
use crate::spec::EvalSpec;
use crate::validation::ValidatedSpec;

/// Default number of concurrent sessions.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Default per-session time budget.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

/// Sub-directory of `<runDir>/<sessionId>/` the session works in.
pub const SANDBOX_DIR: &str = "sandbox";

/// File the session transcript is written to.
pub const TRANSCRIPT_FILE: &str = "transcript.log";

/// Configuration for a scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Wall-clock budget per session, including fixture preparation and
    /// binary checks.
    pub timeout: Duration,
    /// Run directory.
    pub output_dir: PathBuf,
    /// Suppress progress lines on stdout.
    pub quiet: bool,
    /// Collect artifacts of each completed session as it finishes.
    pub auto_collect: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_SESSION_TIMEOUT,
            output_dir: PathBuf::from("results"),
            quiet: false,
            auto_collect: true,
        }
    }
}

impl SchedulerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Sets the number of workers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the per-session timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_auto_collect(mut self, auto_collect: bool) -> Self {
        self.auto_collect = auto_collect;
        self
    }
}

/// Counters shared between workers.
struct SharedRunStats {
    finished: AtomicU64,
    total: u64,
}

impl SharedRunStats {
    fn new(total: usize) -> Self {
        Self {
            finished: AtomicU64::new(0),
            total: total as u64,
        }
    }

    /// Records a finished item and returns how many have finished so far.
    fn record_finished(&self) -> u64 {
        self.finished.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Runs every work item of a validated spec.
pub struct SessionScheduler {
    config: SchedulerConfig,
    executor: Arc<dyn SessionExecutor>,
    checks: CheckRunner,
    diagnostics: Diagnostics,
}

impl SessionScheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn SessionExecutor>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            config,
            executor,
            checks: CheckRunner::new(),
            diagnostics,
        }
    }

    /// Overrides the binary check runner.
    pub fn with_check_runner(mut self, checks: CheckRunner) -> Self {
        self.checks = checks;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Executes every work item and returns the final manifest.
    ///
    /// Only run-level problems (output directory, manifest I/O, zero
    /// concurrency) are errors. Session failures are recorded per item.
    pub async fn run(&self, validated: &ValidatedSpec) -> Result<RunManifest, SchedulerError> {
        if self.config.concurrency == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }

        let spec = Arc::new(validated.spec.clone());
        let output_dir = self.config.output_dir.clone();
        fs::create_dir_all(&output_dir).map_err(|source| SchedulerError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let items = enumerate(&spec);
        let manifest = RunManifest::new(&spec, &items, self.config.concurrency, self.config.timeout);
        let writer = Arc::new(ManifestWriter::new(&output_dir, manifest));
        writer.flush().await?;

        let collector = if self.config.auto_collect {
            match ResultsCollector::new(&spec.collect, self.diagnostics.clone()) {
                Ok(collector) => Some(collector),
                Err(e) => {
                    self.diagnostics
                        .warn("scheduler", format!("Automatic collection disabled: {}", e));
                    None
                }
            }
        } else {
            None
        };

        let num_workers = self.config.concurrency.min(items.len());
        let stats = Arc::new(SharedRunStats::new(items.len()));
        let queue = Arc::new(WorkQueue::new(items));

        info!(
            spec = %spec.name,
            sessions = spec.total_sessions(),
            workers = num_workers,
            timeout_secs = self.config.timeout.as_secs(),
            "Starting evaluation run"
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&queue),
                writer: Arc::clone(&writer),
                executor: Arc::clone(&self.executor),
                spec: Arc::clone(&spec),
                output_dir: output_dir.clone(),
                timeout: self.config.timeout,
                quiet: self.config.quiet,
                checks: self.checks.clone(),
                collector: collector.clone(),
                diagnostics: self.diagnostics.clone(),
                stats: Arc::clone(&stats),
            };
            handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
                self.diagnostics
                    .warn("scheduler", format!("Worker task panicked: {}", e));
            }
        }

        // Anything still pending or running was abandoned by a dead worker.
        let snapshot = writer.snapshot().await;
        for (position, session) in snapshot.sessions.iter().enumerate() {
            if !session.status.is_terminal() {
                writer
                    .update(position, |run| {
                        if run.status == SessionStatus::Running {
                            run.finish(
                                SessionStatus::Failed,
                                Vec::new(),
                                Some("Worker aborted before the session finished".to_string()),
                            )
                        } else {
                            run.finish(
                                SessionStatus::Failed,
                                Vec::new(),
                                Some("Session was never launched".to_string()),
                            )
                        }
                    })
                    .await?;
            }
        }

        let manifest = writer.finish().await?;
        let summary = manifest.summary();
        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Evaluation run finished"
        );
        Ok(manifest)
    }
}

/// Result of the session phase of a work item, before checks.
enum SessionPhase {
    Finished(SessionOutcome),
    Errored(String),
    TimedOut,
}

/// A single worker pulling items from the shared queue.
struct Worker {
    id: String,
    queue: Arc<WorkQueue>,
    writer: Arc<ManifestWriter>,
    executor: Arc<dyn SessionExecutor>,
    spec: Arc<EvalSpec>,
    output_dir: PathBuf,
    timeout: Duration,
    quiet: bool,
    checks: CheckRunner,
    collector: Option<ResultsCollector>,
    diagnostics: Diagnostics,
    stats: Arc<SharedRunStats>,
}

impl Worker {
    async fn run(self) {
        info!(worker_id = %self.id, "Worker started");

        while let Some(item) = self.queue.dequeue().await {
            if let Err(e) = self.process(&item).await {
                error!(
                    worker_id = %self.id,
                    variant_id = %item.variant_id,
                    run_index = item.run_index,
                    error = %e,
                    "Failed to record session state"
                );
                self.diagnostics.warn(
                    "scheduler",
                    format!(
                        "Failed to record {} run {}: {}",
                        item.variant_id, item.run_index, e
                    ),
                );
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, item: &WorkItem) -> Result<(), SchedulerError> {
        let Some(variant) = self.spec.variant(&item.variant_id) else {
            self.writer
                .update(item.position, |run| {
                    run.finish(
                        SessionStatus::Failed,
                        Vec::new(),
                        Some(format!("Unknown variant '{}'", item.variant_id)),
                    )
                })
                .await?;
            return Ok(());
        };

        let session_id = Uuid::new_v4().to_string();
        let session_dir = self.output_dir.join(&session_id);
        let workspace = session_dir.join(SANDBOX_DIR);

        self.writer
            .update(item.position, |run| run.start(&session_id, workspace.clone()))
            .await?;

        info!(
            worker_id = %self.id,
            session_id = %session_id,
            variant_id = %item.variant_id,
            run_index = item.run_index,
            "Session started"
        );
        if !self.quiet {
            println!(
                "  started  {} run {} ({})",
                item.variant_id, item.run_index, session_id
            );
        }

        let request = SessionRequest {
            session_id: session_id.clone(),
            variant_id: item.variant_id.clone(),
            run_index: item.run_index,
            prompt: self.spec.composed_prompt(variant),
            fixture: self.spec.fixture.clone(),
            workspace: workspace.clone(),
            timeout: self.timeout,
        };

        let deadline = tokio::time::Instant::now() + self.timeout;
        let phase =
            match tokio::time::timeout_at(deadline, self.executor.execute(&request)).await {
                Ok(Ok(outcome)) => SessionPhase::Finished(outcome),
                Ok(Err(e)) => SessionPhase::Errored(e.to_string()),
                Err(_) => SessionPhase::TimedOut,
            };

        let status = match phase {
            SessionPhase::TimedOut => {
                warn!(
                    worker_id = %self.id,
                    session_id = %session_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Session timed out"
                );
                self.executor.stop(&session_id).await;
                let message = format!("Session exceeded {}s timeout", self.timeout.as_secs());
                self.writer
                    .update(item.position, |run| {
                        run.finish(SessionStatus::TimedOut, Vec::new(), Some(message))
                    })
                    .await?;
                SessionStatus::TimedOut
            }
            SessionPhase::Errored(message) => {
                warn!(
                    worker_id = %self.id,
                    session_id = %session_id,
                    error = %message,
                    "Session failed"
                );
                self.writer
                    .update(item.position, |run| {
                        run.finish(SessionStatus::Failed, Vec::new(), Some(message))
                    })
                    .await?;
                SessionStatus::Failed
            }
            SessionPhase::Finished(outcome) => {
                write_transcript(&session_dir, &outcome, &self.diagnostics);

                let checks = self
                    .checks
                    .run_all(&self.spec.binary_checks, &workspace, Some(deadline))
                    .await;
                let status = if checks.timed_out {
                    SessionStatus::TimedOut
                } else {
                    SessionStatus::Completed
                };
                let error = checks.timed_out.then(|| {
                    format!(
                        "Binary checks exceeded the {}s session budget",
                        self.timeout.as_secs()
                    )
                });
                self.writer
                    .update(item.position, |run| run.finish(status, checks.results, error))
                    .await?;
                status
            }
        };

        if status == SessionStatus::Completed {
            self.collect(&session_id, &workspace, &session_dir);
        }

        let finished = self.stats.record_finished();
        info!(
            worker_id = %self.id,
            session_id = %session_id,
            status = %status,
            progress = %format!("{}/{}", finished, self.stats.total),
            "Session finished"
        );
        if !self.quiet {
            println!(
                "  [{}/{}] {} run {}: {}",
                finished, self.stats.total, item.variant_id, item.run_index, status
            );
        }
        Ok(())
    }

    fn collect(&self, session_id: &str, workspace: &Path, session_dir: &Path) {
        let Some(collector) = &self.collector else {
            return;
        };
        let output_dir = session_dir.join(ARTIFACTS_DIR);
        match collector.collect(
            session_id,
            workspace,
            SessionStatus::Completed,
            &output_dir,
            false,
        ) {
            Ok(artifacts) => debug!(
                session_id = %session_id,
                files = artifacts.files.len(),
                "Auto-collected artifacts"
            ),
            Err(e) => self.diagnostics.warn(
                "collector",
                format!("Automatic collection of {} failed: {}", session_id, e),
            ),
        }
    }
}

fn write_transcript(session_dir: &Path, outcome: &SessionOutcome, diagnostics: &Diagnostics) {
    let path = session_dir.join(TRANSCRIPT_FILE);
    if let Err(e) = fs::write(&path, outcome.transcript()) {
        diagnostics.warn(
            "scheduler",
            format!("Failed to write transcript {}: {}", path.display(), e),
        );
    }
}
