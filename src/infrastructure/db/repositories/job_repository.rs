use crate::domain::entities::job::{Job, Lease, NewJob};
use crate::domain::value_objects::ids::{JobId, WorkerId};
use crate::infrastructure::db::dto::JobRow;
use crate::infrastructure::db::stores::job_store::{JobStore, StoreError};
use std::sync::Arc;
use time::Duration;

pub struct JobRepository {
    store: Arc<dyn JobStore>,
}

impl JobRepository {
    /// Build a repository that uses the given store implementation.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Create a job and return what was actually stored.
    pub async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        self.store.insert(job).await?.into_job()
    }

    /// Fetch a job by its ID. Returns `None` if it doesn't exist.
    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.store.get(job_id.0).await?.map(JobRow::into_job).transpose()
    }

    /// Atomically claim the next eligible job among `queues` for `worker_id`.
    pub async fn claim_next(
        &self,
        queues: &[String],
        worker_id: &WorkerId,
        lease: Duration,
    ) -> Result<Option<Job>, StoreError> {
        self.store
            .claim_next(queues, worker_id.as_str(), lease)
            .await?
            .map(JobRow::into_job)
            .transpose()
    }

    /// Fail expired leases in `queues` that were on their final attempt.
    pub async fn fail_exhausted_leases(&self, queues: &[String]) -> Result<Vec<Job>, StoreError> {
        self.store
            .fail_exhausted_leases(queues)
            .await?
            .into_iter()
            .map(JobRow::into_job)
            .collect()
    }

    /// Extend `lease` by `duration` from now and return the refreshed lease.
    pub async fn renew_lease(&self, lease: &Lease, duration: Duration) -> Result<Lease, StoreError> {
        let job = self
            .store
            .renew_lease(lease.job_id.0, lease.reserved_at.as_inner(), duration)
            .await?
            .into_job()?;

        job.lease()
            .ok_or_else(|| StoreError::Corrupt(format!("job {} renewed without a lease", job.id)))
    }

    pub async fn complete(&self, lease: &Lease) -> Result<Job, StoreError> {
        self.store
            .mark_completed(lease.job_id.0, lease.reserved_at.as_inner())
            .await?
            .into_job()
    }

    pub async fn fail_retryable(
        &self,
        lease: &Lease,
        error: &str,
        backoff: Duration,
    ) -> Result<Job, StoreError> {
        self.store
            .mark_failed_retryable(lease.job_id.0, lease.reserved_at.as_inner(), error, backoff)
            .await?
            .into_job()
    }

    pub async fn fail_permanent(&self, lease: &Lease, error: &str) -> Result<Job, StoreError> {
        self.store
            .mark_failed_permanent(lease.job_id.0, lease.reserved_at.as_inner(), error)
            .await?
            .into_job()
    }

    /// Number of jobs a claim on `queues` could take right now.
    pub async fn eligible_count(&self, queues: &[String]) -> Result<u64, StoreError> {
        self.store.eligible_count(queues).await
    }
}
