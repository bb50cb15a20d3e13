// Use case: worker_manager.

use crate::domain::value_objects::ids::WorkerId;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stopped on request or drained its queues.
    Clean,
    /// Could not start (e.g. store unreachable). Restarting would not help.
    Fatal(String),
    /// Died unexpectedly. Its claimed job is recovered through lease expiry.
    Crashed(String),
}

/// Starts one worker bound to `queues`, observing `stop` between jobs.
pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        worker_id: WorkerId,
        queues: Vec<String>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<WorkerExit>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("at least one queue is required")]
    NoQueues,
    #[error("all {count} workers failed to start: {reason}")]
    AllWorkersFatal { count: usize, reason: String },
}

/// Totals for one supervised run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub clean: usize,
    pub fatal: usize,
    pub crashed: usize,
    pub restarts: u64,
}

/// Resolves once stop is requested. Returns `false` if the sender went away
/// without requesting it.
pub async fn stop_requested(stop: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *stop.borrow_and_update() {
            return true;
        }
        if stop.changed().await.is_err() {
            return false;
        }
    }
}

/// Supervises a fixed number of workers until they have all exited.
pub struct WorkerManager {
    launcher: Arc<dyn WorkerLauncher>,
    restart_delay: Duration,
}

type Supervised = BoxFuture<'static, (usize, WorkerExit)>;

impl WorkerManager {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, restart_delay: Duration) -> Self {
        Self {
            launcher,
            restart_delay,
        }
    }

    /// Spawn `count` workers on `queues` and block until all have exited.
    ///
    /// Setting `stop` asks every worker to finish its current job and exit.
    /// Nothing is killed. Crashed workers are restarted unless stop was
    /// requested. Repeated stop requests are harmless.
    pub async fn start(
        &self,
        count: usize,
        queues: Vec<String>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<PoolReport, WorkerPoolError> {
        if count == 0 {
            return Err(WorkerPoolError::NoWorkers);
        }
        if queues.is_empty() {
            return Err(WorkerPoolError::NoQueues);
        }

        // Step 1: Spawn every slot.
        info!(workers = count, queues = ?queues, "starting worker pool");
        let mut running: FuturesUnordered<Supervised> = FuturesUnordered::new();
        for slot in 1..=count {
            running.push(self.supervise(slot, queues.clone(), stop.clone(), None));
        }

        let mut report = PoolReport::default();
        let mut stopping = *stop.borrow();
        let mut stop_open = true;
        let mut last_fatal = String::new();

        // Step 2: Reap exits until no slot is left.
        loop {
            tokio::select! {
                changed = stop.changed(), if stop_open && !stopping => {
                    match changed {
                        Ok(()) if *stop.borrow() => {
                            stopping = true;
                            info!(remaining = running.len(), "stop requested, waiting for workers");
                        }
                        Ok(()) => {}
                        Err(_) => stop_open = false,
                    }
                }
                next = running.next() => {
                    let Some((slot, exit)) = next else {
                        break;
                    };
                    match exit {
                        WorkerExit::Clean => {
                            report.clean += 1;
                            info!(slot, "worker exited");
                        }
                        WorkerExit::Fatal(reason) => {
                            report.fatal += 1;
                            error!(slot, reason = %reason, "worker failed to start");
                            last_fatal = reason;
                        }
                        WorkerExit::Crashed(reason) if stopping || *stop.borrow() => {
                            report.crashed += 1;
                            warn!(slot, reason = %reason, "worker crashed during shutdown");
                        }
                        WorkerExit::Crashed(reason) => {
                            // Step 3: Replace crashed workers after a pause.
                            report.restarts += 1;
                            counter!("worker_restarts_total").increment(1);
                            warn!(slot, reason = %reason, "worker crashed, restarting");
                            running.push(self.supervise(
                                slot,
                                queues.clone(),
                                stop.clone(),
                                Some(self.restart_delay),
                            ));
                        }
                    }
                }
            }
        }

        // Step 4: Surface a pool that never got going.
        if report.fatal == count {
            return Err(WorkerPoolError::AllWorkersFatal {
                count,
                reason: last_fatal,
            });
        }

        info!(
            clean = report.clean,
            fatal = report.fatal,
            restarts = report.restarts,
            "worker pool stopped"
        );
        Ok(report)
    }

    fn supervise(
        &self,
        slot: usize,
        queues: Vec<String>,
        stop: watch::Receiver<bool>,
        delay: Option<Duration>,
    ) -> Supervised {
        let launcher = self.launcher.clone();
        async move {
            if let Some(delay) = delay {
                let mut waiter = stop.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    true = stop_requested(&mut waiter) => return (slot, WorkerExit::Clean),
                }
            }

            let worker_id = WorkerId::for_slot(std::process::id(), slot);
            let exit = match launcher.launch(worker_id, queues, stop).await {
                Ok(exit) => exit,
                Err(join_error) if join_error.is_panic() => {
                    WorkerExit::Crashed(format!("worker panicked: {join_error}"))
                }
                Err(join_error) => WorkerExit::Crashed(join_error.to_string()),
            };
            (slot, exit)
        }
        .boxed()
    }
}
