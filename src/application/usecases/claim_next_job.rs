// Use case: claim_next_job.

use crate::application::context::AppContext;
use crate::application::usecases::record_job_failure::RecordJobFailureUseCase;
use crate::domain::entities::job::{Job, Lease};
use crate::domain::value_objects::ids::WorkerId;
use crate::infrastructure::db::stores::job_store::StoreError;
use metrics::counter;
use tracing::{debug, warn};

/// Claims the next eligible job for a worker.
pub struct ClaimNextJobUseCase;

#[derive(Debug)]
pub enum ClaimNextJobError {
    Storage(StoreError),
    /// The store returned a claimed row without a lease.
    MissingLease,
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub lease: Lease,
}

impl ClaimNextJobUseCase {
    /// Claim the best eligible job among `queues`, if any.
    pub async fn execute(
        ctx: &AppContext,
        queues: &[String],
        worker_id: &WorkerId,
    ) -> Result<Option<ClaimedJob>, ClaimNextJobError> {
        // Step 1: Expired leases with no attempts left are failed, not reclaimed.
        let exhausted = ctx
            .repos
            .job
            .fail_exhausted_leases(queues)
            .await
            .map_err(ClaimNextJobError::Storage)?;
        for job in &exhausted {
            RecordJobFailureUseCase::record_lease_exhausted(ctx, job).await;
        }

        // Step 2: Use the longest lease among the subscribed queues.
        let lease_duration = ctx.leases.lease_duration_for(queues);

        // Step 3: Atomically select and reserve the next row.
        let Some(job) = ctx
            .repos
            .job
            .claim_next(queues, worker_id, lease_duration)
            .await
            .map_err(ClaimNextJobError::Storage)?
        else {
            return Ok(None);
        };

        // Step 4: The lease is the ownership token for every later write.
        let Some(lease) = job.lease() else {
            warn!(job_id = %job.id, "claimed job has no lease");
            return Err(ClaimNextJobError::MissingLease);
        };

        counter!("jobs_claimed_total", "queue" => job.queue.clone()).increment(1);
        debug!(
            job_id = %job.id,
            queue = %job.queue,
            worker_id = %worker_id,
            attempts = job.attempts,
            "job claimed"
        );

        Ok(Some(ClaimedJob { job, lease }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::test_support::{test_context, test_context_with_clock};
    use crate::domain::entities::job::{JobStatus, NewJob};
    use crate::application::jobs::QueueJob;
    use crate::application::jobs::codec;
    use crate::application::jobs::context::JobContext;
    use crate::application::context::test_support::test_registry;
    use crate::domain::entities::failure::HandlerError;
    use crate::domain::services::lease_manager::LeaseManager;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::Duration;

    static FINAL_HOOKS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Serialize, Deserialize)]
    struct Watched;

    #[async_trait]
    impl QueueJob for Watched {
        const JOB_TYPE: &'static str = "test.watched";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn on_permanent_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()> {
            assert_eq!(error, "lease expired after final attempt");
            assert_eq!(ctx.attempts(), 1);
            FINAL_HOOKS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn new_job(queue: &str) -> NewJob {
        NewJob {
            queue: queue.to_string(),
            payload: "{}".to_string(),
            priority: 0,
            max_retries: 1,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn given_empty_queue_when_execute_should_return_none() {
        let ctx = test_context();

        let claimed = ClaimNextJobUseCase::execute(&ctx, &["default".into()], &WorkerId::for_slot(1, 1))
            .await
            .unwrap();

        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn given_pending_job_when_execute_should_reserve_it_with_lease() {
        let ctx = test_context();
        ctx.repos.job.insert(&new_job("default")).await.unwrap();

        let claimed = ClaimNextJobUseCase::execute(&ctx, &["default".into()], &WorkerId::for_slot(1, 1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.job.status, JobStatus::Processing);
        assert_eq!(claimed.job.attempts, 1);
        assert_eq!(claimed.job.reserved_by.as_deref(), Some("worker-1-1"));
        assert_eq!(
            claimed.lease.locked_until,
            claimed.lease.reserved_at.plus(Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn given_queue_lease_override_when_claiming_several_queues_should_use_longest() {
        let mut ctx = test_context();
        ctx.leases = LeaseManager::default().with_queue_lease("reports", Duration::minutes(10));
        ctx.repos.job.insert(&new_job("reports")).await.unwrap();

        let claimed = ClaimNextJobUseCase::execute(
            &ctx,
            &["default".into(), "reports".into()],
            &WorkerId::for_slot(1, 1),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            claimed.lease.locked_until,
            claimed.lease.reserved_at.plus(Duration::minutes(10))
        );
    }

    #[tokio::test]
    async fn given_final_attempt_lease_expired_when_claiming_should_fail_it_and_run_final_hook() {
        let (mut ctx, clock) = test_context_with_clock();
        let mut registry = test_registry();
        registry.register::<Watched>().unwrap();
        ctx.registry = Arc::new(registry);
        let inserted = ctx
            .repos
            .job
            .insert(&NewJob {
                payload: codec::encode(&Watched).unwrap(),
                max_retries: 0,
                ..new_job("default")
            })
            .await
            .unwrap();
        let worker = WorkerId::for_slot(1, 1);
        ClaimNextJobUseCase::execute(&ctx, &["default".into()], &worker)
            .await
            .unwrap()
            .unwrap();
        let before = FINAL_HOOKS.load(Ordering::SeqCst);

        clock.advance(Duration::seconds(61));
        let claimed = ClaimNextJobUseCase::execute(&ctx, &["default".into()], &worker)
            .await
            .unwrap();

        assert!(claimed.is_none());
        assert_eq!(FINAL_HOOKS.load(Ordering::SeqCst), before + 1);
        let stored = ctx.repos.job.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.failed_at.is_some());
    }

    #[tokio::test]
    async fn given_undecodable_exhausted_job_when_claiming_should_still_serve_next_job() {
        let (ctx, clock) = test_context_with_clock();
        ctx.repos
            .job
            .insert(&NewJob {
                max_retries: 0,
                ..new_job("default")
            })
            .await
            .unwrap();
        let worker = WorkerId::for_slot(1, 1);
        ClaimNextJobUseCase::execute(&ctx, &["default".into()], &worker)
            .await
            .unwrap()
            .unwrap();
        clock.advance(Duration::seconds(61));
        let next = ctx.repos.job.insert(&new_job("default")).await.unwrap();

        let claimed = ClaimNextJobUseCase::execute(&ctx, &["default".into()], &worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.job.id, next.id);
    }
}
