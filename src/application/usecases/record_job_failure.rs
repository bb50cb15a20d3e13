// Use case: record_job_failure.

use crate::application::context::AppContext;
use crate::application::jobs::codec;
use crate::application::jobs::context::JobContext;
use crate::application::jobs::registry::ErasedJob;
use crate::domain::entities::failure::JobFailure;
use crate::domain::entities::job::{Job, Lease};
use crate::domain::services::failure_classifier::{FailureClassifier, FailureDecision};
use crate::infrastructure::db::stores::job_store::StoreError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use time::Duration;
use tracing::{error, warn};

/// Applies the retry policy to a failed attempt and notifies the job's hooks.
pub struct RecordJobFailureUseCase;

#[derive(Debug)]
pub enum RecordJobFailureError {
    /// Another worker owns the job now; nothing was written.
    LeaseLost,
    Storage(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { backoff: Duration },
    Failed,
}

/// The hydrated job and its context, when the payload could be decoded.
pub struct FailureHooks<'a> {
    pub job: &'a dyn ErasedJob,
    pub ctx: &'a JobContext,
}

impl RecordJobFailureUseCase {
    pub async fn execute(
        ctx: &AppContext,
        job: &Job,
        lease: &Lease,
        failure: &JobFailure,
        hooks: Option<FailureHooks<'_>>,
    ) -> Result<FailureOutcome, RecordJobFailureError> {
        let message = failure.message();

        // Step 1: Decide between retry and permanent failure.
        let decision = FailureClassifier::classify(job, failure, &ctx.leases);

        // Step 2: Persist the decision under our lease.
        let written = match decision {
            FailureDecision::Retry { backoff } => ctx
                .repos
                .job
                .fail_retryable(lease, &message, backoff)
                .await
                .map(|_| FailureOutcome::Retrying { backoff }),
            FailureDecision::Permanent => ctx
                .repos
                .job
                .fail_permanent(lease, &message)
                .await
                .map(|_| FailureOutcome::Failed),
        };
        let outcome = written.map_err(|e| match e {
            StoreError::LeaseLost => RecordJobFailureError::LeaseLost,
            other => RecordJobFailureError::Storage(other),
        })?;

        // Step 3: Log and count the transition.
        match outcome {
            FailureOutcome::Retrying { backoff } => {
                counter!("jobs_retried_total", "queue" => job.queue.clone()).increment(1);
                warn!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempts = job.attempts,
                    max_retries = job.max_retries,
                    backoff_ms = backoff.whole_milliseconds() as i64,
                    error = %message,
                    "job failed, retry scheduled"
                );
            }
            FailureOutcome::Failed => {
                counter!("jobs_failed_total", "queue" => job.queue.clone()).increment(1);
                match failure {
                    JobFailure::Decode(_) => error!(
                        job_id = %job.id,
                        queue = %job.queue,
                        payload = %job.payload,
                        error = %message,
                        "job payload could not be decoded"
                    ),
                    _ => error!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempts = job.attempts,
                        error = %message,
                        "job failed permanently"
                    ),
                }
            }
        }

        // Step 4: Run the job's hook. Hook errors and panics are only logged.
        if let Some(FailureHooks { job: erased, ctx: job_ctx }) = hooks {
            let hook = match outcome {
                FailureOutcome::Retrying { .. } => erased.on_failure(job_ctx, &message),
                FailureOutcome::Failed => erased.on_permanent_failure(job_ctx, &message),
            };
            run_hook(job, hook).await;
        }

        Ok(outcome)
    }

    /// Account for a job the store failed because its final attempt's lease
    /// expired. The row is already `Failed`; only counting and the permanent
    /// failure hook remain.
    pub async fn record_lease_exhausted(ctx: &AppContext, job: &Job) {
        let message = job.error.clone().unwrap_or_default();

        counter!("jobs_failed_total", "queue" => job.queue.clone()).increment(1);
        error!(
            job_id = %job.id,
            queue = %job.queue,
            attempts = job.attempts,
            reserved_by = ?job.reserved_by,
            error = %message,
            "job failed permanently"
        );

        let erased = match codec::hydrate(&ctx.registry, &job.payload) {
            Ok(erased) => erased,
            Err(decode_error) => {
                warn!(job_id = %job.id, error = %decode_error, "skipping failure hook");
                return;
            }
        };
        let job_ctx = JobContext::detached(job.id, job.queue.clone(), job.attempts);
        run_hook(job, erased.on_permanent_failure(&job_ctx, &message)).await;
    }
}

async fn run_hook(job: &Job, hook: BoxFuture<'_, anyhow::Result<()>>) {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(hook_error)) => warn!(
            job_id = %job.id,
            error = %format!("{hook_error:#}"),
            "failure hook returned an error"
        ),
        Err(panic) => warn!(
            job_id = %job.id,
            error = %JobFailure::from_panic(&*panic).message(),
            "failure hook panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::test_support::test_context;
    use crate::application::jobs::QueueJob;
    use crate::application::usecases::claim_next_job::{ClaimNextJobUseCase, ClaimedJob};
    use crate::domain::entities::failure::{DecodeError, HandlerError};
    use crate::domain::entities::job::{JobStatus, NewJob};
    use crate::domain::value_objects::ids::WorkerId;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RETRY_HOOKS: AtomicUsize = AtomicUsize::new(0);
    static FINAL_HOOKS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Serialize, Deserialize)]
    struct Noisy;

    #[async_trait]
    impl QueueJob for Noisy {
        const JOB_TYPE: &'static str = "test.noisy";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn on_failure(&self, _ctx: &JobContext, _error: &str) -> anyhow::Result<()> {
            RETRY_HOOKS.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("hook exploded")
        }

        async fn on_permanent_failure(&self, _ctx: &JobContext, _error: &str) -> anyhow::Result<()> {
            FINAL_HOOKS.fetch_add(1, Ordering::SeqCst);
            panic!("hook panicked");
        }
    }

    async fn claim(ctx: &AppContext, max_retries: u32) -> ClaimedJob {
        ctx.repos
            .job
            .insert(&NewJob {
                queue: "default".into(),
                payload: "{}".into(),
                priority: 0,
                max_retries,
                delay: Duration::ZERO,
            })
            .await
            .unwrap();
        ClaimNextJobUseCase::execute(ctx, &["default".into()], &WorkerId::for_slot(1, 1))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn given_attempts_remaining_when_failure_recorded_should_reschedule_and_call_retry_hook() {
        let ctx = test_context();
        let claimed = claim(&ctx, 2).await;
        let job_ctx = JobContext::detached(claimed.job.id, "default", 1);
        let before = RETRY_HOOKS.load(Ordering::SeqCst);

        let outcome = RecordJobFailureUseCase::execute(
            &ctx,
            &claimed.job,
            &claimed.lease,
            &JobFailure::Handler(HandlerError::new("smtp timeout")),
            Some(FailureHooks {
                job: &Noisy,
                ctx: &job_ctx,
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                backoff: Duration::seconds(1)
            }
        );
        assert!(RETRY_HOOKS.load(Ordering::SeqCst) > before);
        let stored = ctx.repos.job.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn given_panicking_final_hook_when_failure_recorded_should_still_fail_job() {
        let ctx = test_context();
        let claimed = claim(&ctx, 0).await;
        let job_ctx = JobContext::detached(claimed.job.id, "default", 1);
        let before = FINAL_HOOKS.load(Ordering::SeqCst);

        let outcome = RecordJobFailureUseCase::execute(
            &ctx,
            &claimed.job,
            &claimed.lease,
            &JobFailure::Handler(HandlerError::new("boom")),
            Some(FailureHooks {
                job: &Noisy,
                ctx: &job_ctx,
            }),
        )
        .await
        .unwrap();

        assert_eq!(outcome, FailureOutcome::Failed);
        assert!(FINAL_HOOKS.load(Ordering::SeqCst) > before);
        let stored = ctx.repos.job.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.failed_at.is_some());
    }

    #[tokio::test]
    async fn given_decode_failure_when_recorded_should_fail_without_retry() {
        let ctx = test_context();
        let claimed = claim(&ctx, 5).await;

        let outcome = RecordJobFailureUseCase::execute(
            &ctx,
            &claimed.job,
            &claimed.lease,
            &JobFailure::Decode(DecodeError::Malformed("eof".into())),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FailureOutcome::Failed);
        let stored = ctx.repos.job.get(claimed.job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.error.as_deref(), Some("malformed payload: eof"));
    }
}
