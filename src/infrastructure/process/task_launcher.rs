use crate::application::context::AppContext;
use crate::application::usecases::worker_loop::{WorkerLoopConfig, WorkerLoopError, WorkerLoopUseCase};
use crate::application::usecases::worker_manager::{WorkerExit, WorkerLauncher};
use crate::domain::value_objects::ids::WorkerId;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs each worker loop as its own tokio task inside this process.
///
/// A panic escaping the loop ends only that task; the supervisor sees it as
/// a crash and restarts the slot.
pub struct TaskLauncher {
    ctx: Arc<AppContext>,
    config: WorkerLoopConfig,
}

impl TaskLauncher {
    pub fn new(ctx: Arc<AppContext>, config: WorkerLoopConfig) -> Self {
        Self { ctx, config }
    }
}

impl WorkerLauncher for TaskLauncher {
    fn launch(
        &self,
        worker_id: WorkerId,
        queues: Vec<String>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<WorkerExit> {
        let ctx = self.ctx.clone();
        let config = WorkerLoopConfig {
            queues,
            ..self.config.clone()
        };
        tokio::spawn(async move {
            match WorkerLoopUseCase::run(ctx, worker_id, config, stop).await {
                Ok(_) => WorkerExit::Clean,
                Err(WorkerLoopError::NoQueues) => WorkerExit::Fatal("no queues to work".to_string()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::test_support::test_context;
    use crate::application::jobs::builtin::SyntheticJob;
    use crate::application::usecases::enqueue_job::{Dispatcher, EnqueueOptions};
    use crate::domain::entities::job::JobStatus;
    use std::time::Duration;

    fn draining() -> WorkerLoopConfig {
        WorkerLoopConfig {
            exit_when_empty: true,
            jitter: Duration::ZERO,
            ..WorkerLoopConfig::default()
        }
    }

    #[tokio::test]
    async fn given_pending_job_when_task_worker_drains_should_complete_it_and_exit_clean() {
        let ctx = Arc::new(test_context());
        let id = Dispatcher::enqueue(&ctx, &SyntheticJob::default(), EnqueueOptions::default())
            .await
            .unwrap();
        let launcher = TaskLauncher::new(ctx.clone(), draining());
        let (_tx, rx) = watch::channel(false);

        let exit = launcher
            .launch(WorkerId::for_slot(1, 1), vec!["default".into()], rx)
            .await
            .unwrap();

        assert_eq!(exit, WorkerExit::Clean);
        let stored = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn given_no_queues_when_launched_should_exit_fatal() {
        let launcher = TaskLauncher::new(Arc::new(test_context()), draining());
        let (_tx, rx) = watch::channel(false);

        let exit = launcher
            .launch(WorkerId::for_slot(1, 1), Vec::new(), rx)
            .await
            .unwrap();

        assert!(matches!(exit, WorkerExit::Fatal(_)));
    }
}
