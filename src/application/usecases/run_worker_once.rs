// Use case: run_worker_once.

use crate::application::context::AppContext;
use crate::application::jobs::codec;
use crate::application::jobs::context::JobContext;
use crate::application::usecases::claim_next_job::{ClaimNextJobError, ClaimNextJobUseCase};
use crate::application::usecases::record_job_failure::{
    FailureHooks, FailureOutcome, RecordJobFailureError, RecordJobFailureUseCase,
};
use crate::domain::entities::failure::JobFailure;
use crate::domain::value_objects::ids::{JobId, WorkerId};
use crate::infrastructure::db::stores::job_store::StoreError;
use futures_util::FutureExt;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use time::Duration;
use tracing::{info, instrument, warn};

/// Claims one job, runs it, and records the result.
pub struct RunWorkerOnceUseCase;

#[derive(Debug)]
pub enum RunWorkerOnceError {
    /// The store failed while claiming or finalizing. A job left `Processing`
    /// becomes reclaimable once its lease expires.
    Storage(StoreError),
    MissingLease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunOutcome {
    Completed,
    Retrying { backoff: Duration },
    Failed,
    /// The lease was lost mid-run; another worker owns the job.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRunReport {
    pub job_id: JobId,
    pub outcome: JobRunOutcome,
}

impl From<ClaimNextJobError> for RunWorkerOnceError {
    fn from(error: ClaimNextJobError) -> Self {
        match error {
            ClaimNextJobError::Storage(e) => RunWorkerOnceError::Storage(e),
            ClaimNextJobError::MissingLease => RunWorkerOnceError::MissingLease,
        }
    }
}

impl RunWorkerOnceUseCase {
    /// Returns `None` when no job was eligible.
    #[instrument(skip_all, fields(worker_id = %worker_id))]
    pub async fn execute(
        ctx: &Arc<AppContext>,
        worker_id: &WorkerId,
        queues: &[String],
    ) -> Result<Option<JobRunReport>, RunWorkerOnceError> {
        // Step 1: Claim the next eligible job.
        let Some(claimed) = ClaimNextJobUseCase::execute(ctx, queues, worker_id).await? else {
            return Ok(None);
        };
        let job = claimed.job;
        let lease = claimed.lease;

        // Step 2: Hydrate the payload. Undecodable payloads fail permanently.
        let erased = match codec::hydrate(&ctx.registry, &job.payload) {
            Ok(erased) => erased,
            Err(decode_error) => {
                let failure = JobFailure::Decode(decode_error);
                let outcome =
                    RecordJobFailureUseCase::execute(ctx, &job, &lease, &failure, None).await;
                return Self::report(job.id, &job.queue, outcome).map(Some);
            }
        };

        // Step 3: Run the body, turning a panic into an ordinary failure.
        let job_ctx = JobContext::claimed(ctx.clone(), &job, lease);
        let result = match AssertUnwindSafe(erased.handle(&job_ctx)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(handler_error)) => Err(JobFailure::Handler(handler_error)),
            Err(panic) => Err(JobFailure::from_panic(&*panic)),
        };

        // Step 4: A lost lease means someone else will finalize this job.
        if job_ctx.lease_lost() {
            return Ok(Some(Self::abandoned(job.id, &job.queue)));
        }

        // Step 5: Finalize under the lease we hold.
        match result {
            Ok(()) => match ctx.repos.job.complete(&lease).await {
                Ok(_) => {
                    counter!("jobs_completed_total", "queue" => job.queue.clone()).increment(1);
                    info!(
                        job_id = %job.id,
                        job_type = erased.job_type(),
                        queue = %job.queue,
                        attempts = job.attempts,
                        "job completed"
                    );
                    Ok(Some(JobRunReport {
                        job_id: job.id,
                        outcome: JobRunOutcome::Completed,
                    }))
                }
                Err(StoreError::LeaseLost) => Ok(Some(Self::abandoned(job.id, &job.queue))),
                Err(e) => Err(RunWorkerOnceError::Storage(e)),
            },
            Err(failure) => {
                let hooks = FailureHooks {
                    job: erased.as_ref(),
                    ctx: &job_ctx,
                };
                let outcome =
                    RecordJobFailureUseCase::execute(ctx, &job, &lease, &failure, Some(hooks))
                        .await;
                Self::report(job.id, &job.queue, outcome).map(Some)
            }
        }
    }

    fn report(
        job_id: JobId,
        queue: &str,
        outcome: Result<FailureOutcome, RecordJobFailureError>,
    ) -> Result<JobRunReport, RunWorkerOnceError> {
        let outcome = match outcome {
            Ok(FailureOutcome::Retrying { backoff }) => JobRunOutcome::Retrying { backoff },
            Ok(FailureOutcome::Failed) => JobRunOutcome::Failed,
            Err(RecordJobFailureError::LeaseLost) => return Ok(Self::abandoned(job_id, queue)),
            Err(RecordJobFailureError::Storage(e)) => return Err(RunWorkerOnceError::Storage(e)),
        };
        Ok(JobRunReport { job_id, outcome })
    }

    fn abandoned(job_id: JobId, queue: &str) -> JobRunReport {
        counter!("jobs_abandoned_total", "queue" => queue.to_string()).increment(1);
        warn!(job_id = %job_id, queue, "lease lost, abandoning job");
        JobRunReport {
            job_id,
            outcome: JobRunOutcome::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::test_support::{test_context_with_clock, test_registry};
    use crate::application::jobs::{JobRegistry, QueueJob};
    use crate::application::jobs::builtin::SyntheticJob;
    use crate::application::jobs::registry::test_support::Greet;
    use crate::application::usecases::enqueue_job::{Dispatcher, EnqueueOptions};
    use crate::domain::entities::failure::HandlerError;
    use crate::domain::entities::job::{JobStatus, NewJob};
    use crate::domain::services::clock::ManualClock;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    fn setup() -> (Arc<AppContext>, Arc<ManualClock>) {
        let (ctx, clock) = test_context_with_clock();
        (Arc::new(ctx), clock)
    }

    fn default_queue() -> Vec<String> {
        vec!["default".to_string()]
    }

    #[tokio::test]
    async fn given_no_jobs_when_execute_should_return_none() {
        let (ctx, _) = setup();

        let report = RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &default_queue())
            .await
            .unwrap();

        assert!(report.is_none());
    }

    #[tokio::test]
    async fn given_successful_job_when_execute_should_mark_completed() {
        let (ctx, _) = setup();
        let id = Dispatcher::enqueue(&ctx, &SyntheticJob::default(), EnqueueOptions::default())
            .await
            .unwrap();

        let report = RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &default_queue())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            report,
            JobRunReport {
                job_id: id,
                outcome: JobRunOutcome::Completed
            }
        );
        let job = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.locked_until.is_none());
    }

    #[tokio::test]
    async fn given_failing_job_when_retries_exhausted_should_end_failed_with_all_attempts() {
        let (ctx, clock) = setup();
        let failing = SyntheticJob {
            label: "always".into(),
            sleep_ms: 0,
            fail: true,
        };
        let id = Dispatcher::enqueue(
            &ctx,
            &failing,
            EnqueueOptions::default().with_max_retries(2),
        )
        .await
        .unwrap();
        let worker = WorkerId::for_slot(1, 1);

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let report = RunWorkerOnceUseCase::execute(&ctx, &worker, &default_queue())
                .await
                .unwrap()
                .unwrap();
            outcomes.push(report.outcome);
            clock.advance(Duration::minutes(10));
        }

        assert!(matches!(outcomes[0], JobRunOutcome::Retrying { .. }));
        assert!(matches!(outcomes[1], JobRunOutcome::Retrying { .. }));
        assert_eq!(outcomes[2], JobRunOutcome::Failed);
        let job = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.error.unwrap().contains("always"));
    }

    #[tokio::test]
    async fn given_malformed_payload_when_execute_should_fail_without_retry() {
        let (ctx, _) = setup();
        let stored = ctx
            .repos
            .job
            .insert(&NewJob {
                queue: "default".into(),
                payload: "{{{ not json".into(),
                priority: 0,
                max_retries: 5,
                delay: Duration::ZERO,
            })
            .await
            .unwrap();

        let report = RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &default_queue())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.outcome, JobRunOutcome::Failed);
        let job = ctx.repos.job.get(stored.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn given_fatal_handler_error_when_execute_should_fail_immediately() {
        let (ctx, _) = setup();
        let id = Dispatcher::enqueue(
            &ctx,
            &Greet { name: String::new() },
            EnqueueOptions::default().on_queue("default"),
        )
        .await
        .unwrap();

        let report = RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &default_queue())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.outcome, JobRunOutcome::Failed);
        let job = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("nobody to greet"));
    }

    #[derive(Serialize, Deserialize)]
    struct Explodes;

    #[async_trait]
    impl QueueJob for Explodes {
        const JOB_TYPE: &'static str = "test.explodes";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Sleepy;

    #[async_trait]
    impl QueueJob for Sleepy {
        const JOB_TYPE: &'static str = "test.sleepy";

        async fn handle(&self, ctx: &JobContext) -> Result<(), HandlerError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            ctx.renew_lease().await?;
            Ok(())
        }
    }

    fn context_with(register: impl FnOnce(&mut JobRegistry)) -> (Arc<AppContext>, Arc<ManualClock>) {
        let (mut ctx, clock) = test_context_with_clock();
        let mut registry = test_registry();
        register(&mut registry);
        ctx.registry = Arc::new(registry);
        (Arc::new(ctx), clock)
    }

    #[tokio::test]
    async fn given_panicking_handler_when_execute_should_record_retryable_failure() {
        let (ctx, _) = context_with(|r| r.register::<Explodes>().unwrap());
        let id = Dispatcher::enqueue(&ctx, &Explodes, EnqueueOptions::default())
            .await
            .unwrap();

        let report = RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &default_queue())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(report.outcome, JobRunOutcome::Retrying { .. }));
        let job = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("job panicked: handler blew up"));
    }

    #[tokio::test]
    async fn given_lease_reclaimed_mid_run_when_renewing_should_abandon_without_finalizing() {
        let (ctx, clock) = context_with(|r| r.register::<Sleepy>().unwrap());
        let id = Dispatcher::enqueue(&ctx, &Sleepy, EnqueueOptions::default().with_max_retries(3))
            .await
            .unwrap();
        let queues = default_queue();

        let running = {
            let ctx = ctx.clone();
            let queues = queues.clone();
            tokio::spawn(async move {
                RunWorkerOnceUseCase::execute(&ctx, &WorkerId::for_slot(1, 1), &queues).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        clock.advance(Duration::seconds(61));
        let thief = ctx
            .repos
            .job
            .claim_next(&queues, &WorkerId::for_slot(2, 1), Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();

        let report = running.await.unwrap().unwrap().unwrap();

        assert_eq!(report.outcome, JobRunOutcome::Abandoned);
        let job = ctx.repos.job.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.reserved_by.as_deref(), Some("worker-2-1"));
        assert_eq!(job.attempts, thief.attempts);
    }
}
