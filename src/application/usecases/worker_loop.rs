// Use case: worker_loop.

use crate::application::context::AppContext;
use crate::application::usecases::run_worker_once::{
    JobRunOutcome, RunWorkerOnceError, RunWorkerOnceUseCase,
};
use crate::domain::value_objects::ids::WorkerId;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Polling behavior of one worker loop.
#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    pub queues: Vec<String>,
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each idle sleep.
    pub jitter: Duration,
    pub store_error_backoff: Duration,
    /// Return as soon as a poll finds nothing to do.
    pub exit_when_empty: bool,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            queues: vec![crate::domain::entities::job::DEFAULT_QUEUE.to_string()],
            poll_interval: Duration::from_millis(1_000),
            jitter: Duration::from_millis(100),
            store_error_backoff: Duration::from_millis(2_000),
            exit_when_empty: false,
        }
    }
}

/// Totals for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub store_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: JobRunOutcome) {
        match outcome {
            JobRunOutcome::Completed => self.completed += 1,
            JobRunOutcome::Retrying { .. } => self.retried += 1,
            JobRunOutcome::Failed => self.failed += 1,
            JobRunOutcome::Abandoned => self.abandoned += 1,
        }
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.retried + self.failed + self.abandoned
    }
}

/// Runs the worker loop until shutdown is requested.
pub struct WorkerLoopUseCase;

#[derive(Debug)]
pub enum WorkerLoopError {
    NoQueues,
}

impl WorkerLoopUseCase {
    /// Claim and run jobs one at a time.
    ///
    /// The stop flag is only checked between jobs: a running job always
    /// finishes its finalization first.
    pub async fn run(
        ctx: Arc<AppContext>,
        worker_id: WorkerId,
        config: WorkerLoopConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerStats, WorkerLoopError> {
        if config.queues.is_empty() {
            return Err(WorkerLoopError::NoQueues);
        }
        let mut stats = WorkerStats::default();
        info!(worker_id = %worker_id, queues = ?config.queues, "worker started");

        // Step 1: Loop until the shutdown signal is triggered.
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Step 2: Attempt to process a single job.
            let pause = match RunWorkerOnceUseCase::execute(&ctx, &worker_id, &config.queues).await
            {
                Ok(Some(report)) => {
                    stats.record(report.outcome);
                    continue;
                }
                Ok(None) if config.exit_when_empty => {
                    debug!(worker_id = %worker_id, "queues drained");
                    break;
                }
                Ok(None) => config.poll_interval + Self::jitter(config.jitter),
                Err(error) => {
                    stats.store_errors += 1;
                    Self::log_transient(&worker_id, &error);
                    config.store_error_backoff
                }
            };

            // Step 3: Sleep until the next poll or shutdown.
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        // Step 4: Exit cleanly once shutdown is signaled.
        info!(
            worker_id = %worker_id,
            processed = stats.processed(),
            completed = stats.completed,
            failed = stats.failed,
            "worker stopped"
        );
        Ok(stats)
    }

    fn jitter(max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    fn log_transient(worker_id: &WorkerId, error: &RunWorkerOnceError) {
        match error {
            RunWorkerOnceError::Storage(store_error) => warn!(
                worker_id = %worker_id,
                error = %store_error,
                "store error, backing off"
            ),
            RunWorkerOnceError::MissingLease => {
                warn!(worker_id = %worker_id, "claimed job had no lease, backing off")
            }
        }
    }
}
