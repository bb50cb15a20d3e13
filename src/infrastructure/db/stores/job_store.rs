use crate::domain::entities::job::NewJob;
use crate::infrastructure::db::database::DatabaseError;
use crate::infrastructure::db::dto::JobRow;
use async_trait::async_trait;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("job not found")]
    NotFound,
    /// The lease token no longer matches: another worker reclaimed the job.
    #[error("lease lost")]
    LeaseLost,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<DatabaseError> for StoreError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Connection(message) => StoreError::Unavailable(message),
            DatabaseError::Query(message) => StoreError::Query(message),
        }
    }
}

/// Durable job table.
///
/// Implementations are the single clock authority: every comparison against
/// `process_at`/`locked_until` and every timestamp written uses the store's own
/// notion of "now". Callers hand over durations, never absolute times.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `Pending` job eligible at store-now + `job.delay`.
    async fn insert(&self, job: &NewJob) -> Result<JobRow, StoreError>;

    /// Fetch a job by its ID. Returns `None` if it doesn't exist.
    async fn get(&self, job_id: i64) -> Result<Option<JobRow>, StoreError>;

    /// Atomically claim the next eligible job among `queues`.
    ///
    /// Eligible means `process_at <= now` and either `Pending`, or `Processing`
    /// with an expired lease. Selection is priority descending, then
    /// `created_at` ascending, then id. The claimed row becomes `Processing`
    /// with `reserved_at = now`, `locked_until = now + lease` and one more
    /// attempt. Expired leases whose attempt budget is already spent are never
    /// reclaimed; see [`JobStore::fail_exhausted_leases`].
    async fn claim_next(
        &self,
        queues: &[String],
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<JobRow>, StoreError>;

    /// Move every `Processing` row in `queues` whose lease expired on its final
    /// attempt to `Failed`, and return the rows that changed.
    async fn fail_exhausted_leases(&self, queues: &[String]) -> Result<Vec<JobRow>, StoreError>;

    /// Push `locked_until` to now + `lease` if `reserved_at` still matches.
    async fn renew_lease(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        lease: Duration,
    ) -> Result<JobRow, StoreError>;

    /// `Processing -> Completed` for the holder of the lease.
    async fn mark_completed(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
    ) -> Result<JobRow, StoreError>;

    /// `Processing -> Pending`, eligible again at now + `backoff`.
    async fn mark_failed_retryable(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
        backoff: Duration,
    ) -> Result<JobRow, StoreError>;

    /// `Processing -> Failed` for the holder of the lease.
    async fn mark_failed_permanent(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
    ) -> Result<JobRow, StoreError>;

    /// Count jobs in `queues` that a claim could take right now.
    async fn eligible_count(&self, queues: &[String]) -> Result<u64, StoreError>;
}
