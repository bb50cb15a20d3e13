use crate::domain::entities::job::NewJob;
use crate::infrastructure::db::dto::JobRow;
use crate::infrastructure::db::dto::job::JOB_COLUMNS;
use crate::infrastructure::db::postgres::PostgresDatabase;
use crate::infrastructure::db::stores::job_store::{JobStore, StoreError};
use async_trait::async_trait;
use sqlx::PgConnection;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const LEASE_EXHAUSTED: &str = "lease expired after final attempt";

/// Pending rows, and expired leases that still have an attempt left.
const CLAIMABLE: &str = "(status = 'pending'
       OR (status = 'processing' AND locked_until <= NOW() AND attempts <= max_retries))";

fn query_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn to_i32(field: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::InvalidInput(format!("{field} out of range")))
}

#[derive(Clone)]
pub struct JobStorePostgres {
    db: Arc<PostgresDatabase>,
}

impl JobStorePostgres {
    /// Build a Postgres-backed job store.
    pub fn new(db: Arc<PostgresDatabase>) -> Self {
        Self { db }
    }

    async fn get_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
    ) -> Result<Option<JobRow>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(row)
    }

    async fn insert_impl_conn(conn: &mut PgConnection, job: NewJob) -> Result<JobRow, StoreError> {
        // Step 1: Reject rows the claim query could never serve.
        if job.queue.trim().is_empty() {
            return Err(StoreError::InvalidInput("queue name is empty".to_string()));
        }
        let max_retries = to_i32("max_retries", job.max_retries)?;

        // Step 2: Insert with eligibility computed from the database clock.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO queue_jobs (queue, payload, priority, max_retries, status, process_at)
             VALUES ($1, $2, $3, $4, 'pending', NOW() + make_interval(secs => $5))
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(max_retries)
        .bind(job.delay.max(Duration::ZERO).as_seconds_f64())
        .fetch_one(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(row)
    }

    async fn fail_exhausted_leases_impl_conn(
        conn: &mut PgConnection,
        queues: &[String],
    ) -> Result<Vec<JobRow>, StoreError> {
        // `attempts > max_retries` stays inside INTEGER for any max_retries.
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE queue_jobs
             SET status = 'failed',
                 failed_at = NOW(),
                 error = $2,
                 reserved_at = NULL,
                 locked_until = NULL
             WHERE queue = ANY($1)
               AND status = 'processing'
               AND locked_until <= NOW()
               AND attempts > max_retries
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(queues)
        .bind(LEASE_EXHAUSTED)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(rows)
    }

    async fn claim_next_impl_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        queues: Vec<String>,
        worker_id: String,
        lease: Duration,
    ) -> Result<Option<JobRow>, StoreError> {
        // Lock the best eligible row, skipping rows other claimers hold.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "WITH next_job AS (
                SELECT id
                FROM queue_jobs
                WHERE queue = ANY($1)
                  AND process_at <= NOW()
                  AND {CLAIMABLE}
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                reserved_at = clock_timestamp(),
                reserved_by = $2,
                locked_until = NOW() + make_interval(secs => $3),
                error = NULL
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}"
        ))
        .bind(&queues)
        .bind(&worker_id)
        .bind(lease.as_seconds_f64())
        .fetch_optional(&mut **tx)
        .await
        .map_err(query_error)?;

        Ok(row)
    }

    /// Explain why a lease-guarded update touched no row.
    async fn lease_miss_impl_conn(conn: &mut PgConnection, job_id: i64) -> StoreError {
        match Self::get_impl_conn(conn, job_id).await {
            Ok(Some(_)) => StoreError::LeaseLost,
            Ok(None) => StoreError::NotFound,
            Err(error) => error,
        }
    }

    async fn renew_lease_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        reserved_at: OffsetDateTime,
        lease: Duration,
    ) -> Result<JobRow, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE queue_jobs
             SET locked_until = NOW() + make_interval(secs => $3)
             WHERE id = $1 AND status = 'processing' AND reserved_at = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(reserved_at)
        .bind(lease.as_seconds_f64())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::lease_miss_impl_conn(conn, job_id).await),
        }
    }

    async fn mark_completed_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        reserved_at: OffsetDateTime,
    ) -> Result<JobRow, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE queue_jobs
             SET status = 'completed',
                 completed_at = NOW(),
                 reserved_at = NULL,
                 locked_until = NULL,
                 error = NULL
             WHERE id = $1 AND status = 'processing' AND reserved_at = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(reserved_at)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::lease_miss_impl_conn(conn, job_id).await),
        }
    }

    async fn mark_failed_retryable_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
        backoff: Duration,
    ) -> Result<JobRow, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE queue_jobs
             SET status = 'pending',
                 process_at = NOW() + make_interval(secs => $4),
                 reserved_at = NULL,
                 locked_until = NULL,
                 error = $3
             WHERE id = $1 AND status = 'processing' AND reserved_at = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(reserved_at)
        .bind(error)
        .bind(backoff.max(Duration::ZERO).as_seconds_f64())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::lease_miss_impl_conn(conn, job_id).await),
        }
    }

    async fn mark_failed_permanent_impl_conn(
        conn: &mut PgConnection,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
    ) -> Result<JobRow, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE queue_jobs
             SET status = 'failed',
                 failed_at = NOW(),
                 reserved_at = NULL,
                 locked_until = NULL,
                 error = $3
             WHERE id = $1 AND status = 'processing' AND reserved_at = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(reserved_at)
        .bind(error)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::lease_miss_impl_conn(conn, job_id).await),
        }
    }

    async fn eligible_count_impl_conn(
        conn: &mut PgConnection,
        queues: &[String],
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*)
             FROM queue_jobs
             WHERE queue = ANY($1)
               AND process_at <= NOW()
               AND {CLAIMABLE}"
        ))
        .bind(queues)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl JobStore for JobStorePostgres {
    async fn insert(&self, job: &NewJob) -> Result<JobRow, StoreError> {
        let job = job.clone();
        self.db
            .with_conn(move |conn| Box::pin(Self::insert_impl_conn(conn, job)))
            .await
    }

    async fn get(&self, job_id: i64) -> Result<Option<JobRow>, StoreError> {
        self.db
            .with_conn(move |conn| Box::pin(Self::get_impl_conn(conn, job_id)))
            .await
    }

    async fn claim_next(
        &self,
        queues: &[String],
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<JobRow>, StoreError> {
        if queues.is_empty() {
            return Ok(None);
        }
        let queues = queues.to_vec();
        let worker_id = worker_id.to_string();
        self.db
            .with_tx(move |tx| Box::pin(Self::claim_next_impl_tx(tx, queues, worker_id, lease)))
            .await
    }

    async fn fail_exhausted_leases(&self, queues: &[String]) -> Result<Vec<JobRow>, StoreError> {
        if queues.is_empty() {
            return Ok(Vec::new());
        }
        let queues = queues.to_vec();
        self.db
            .with_conn(move |conn| {
                Box::pin(async move { Self::fail_exhausted_leases_impl_conn(conn, &queues).await })
            })
            .await
    }

    async fn renew_lease(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        lease: Duration,
    ) -> Result<JobRow, StoreError> {
        self.db
            .with_conn(move |conn| {
                Box::pin(Self::renew_lease_impl_conn(conn, job_id, reserved_at, lease))
            })
            .await
    }

    async fn mark_completed(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
    ) -> Result<JobRow, StoreError> {
        self.db
            .with_conn(move |conn| Box::pin(Self::mark_completed_impl_conn(conn, job_id, reserved_at)))
            .await
    }

    async fn mark_failed_retryable(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
        backoff: Duration,
    ) -> Result<JobRow, StoreError> {
        let error = error.to_string();
        self.db
            .with_conn(move |conn| {
                Box::pin(async move {
                    Self::mark_failed_retryable_impl_conn(conn, job_id, reserved_at, &error, backoff)
                        .await
                })
            })
            .await
    }

    async fn mark_failed_permanent(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
    ) -> Result<JobRow, StoreError> {
        let error = error.to_string();
        self.db
            .with_conn(move |conn| {
                Box::pin(async move {
                    Self::mark_failed_permanent_impl_conn(conn, job_id, reserved_at, &error).await
                })
            })
            .await
    }

    async fn eligible_count(&self, queues: &[String]) -> Result<u64, StoreError> {
        let queues = queues.to_vec();
        self.db
            .with_conn(move |conn| {
                Box::pin(async move { Self::eligible_count_impl_conn(conn, &queues).await })
            })
            .await
    }
}
