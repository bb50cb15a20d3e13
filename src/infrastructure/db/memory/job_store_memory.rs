use crate::domain::entities::job::{Job, JobStatus, NewJob};
use crate::domain::services::clock::{Clock, SystemClock};
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use crate::domain::workflows::state_machine::JobStateMachine;
use crate::infrastructure::db::dto::JobRow;
use crate::infrastructure::db::stores::job_store::{JobStore, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::{Duration, OffsetDateTime};

const LEASE_EXHAUSTED: &str = "lease expired after final attempt";

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, Job>,
    next_id: i64,
    last_token: Option<Timestamp>,
}

/// Process-local job table with the same claim and lease rules as Postgres.
///
/// A single mutex serializes every operation, which gives the same atomicity a
/// row lock gives the Postgres claim. Time comes from the injected [`Clock`].
pub struct InMemoryJobStore {
    table: Mutex<Table>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 1,
                ..Table::default()
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Row holding the lease identified by `reserved_at`, or why there is none.
    fn leased_row<'a>(
        table: &'a mut Table,
        job_id: i64,
        reserved_at: OffsetDateTime,
    ) -> Result<&'a mut Job, StoreError> {
        let job = table.rows.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        let token = Some(Timestamp::from(reserved_at));
        if job.status != JobStatus::Processing || job.reserved_at != token {
            return Err(StoreError::LeaseLost);
        }
        Ok(job)
    }

    fn transition(job: &mut Job, to: JobStatus) -> Result<(), StoreError> {
        job.status = JobStateMachine::transition(job.status, to).map_err(|_| {
            StoreError::Corrupt(format!(
                "job {} cannot move from {} to {}",
                job.id,
                job.status.as_str(),
                to.as_str()
            ))
        })?;
        Ok(())
    }

    fn release(job: &mut Job) {
        job.reserved_at = None;
        job.locked_until = None;
    }

    /// `now + delta`, refusing results outside the representable date range.
    fn shifted(now: Timestamp, delta: Duration, field: &str) -> Result<Timestamp, StoreError> {
        now.checked_plus(delta)
            .ok_or_else(|| StoreError::InvalidInput(format!("{field} out of range")))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &NewJob) -> Result<JobRow, StoreError> {
        if job.queue.trim().is_empty() {
            return Err(StoreError::InvalidInput("queue name is empty".to_string()));
        }
        if i32::try_from(job.max_retries).is_err() {
            return Err(StoreError::InvalidInput("max_retries out of range".to_string()));
        }

        let now = self.clock.now();
        let process_at = Self::shifted(now, job.delay.max(Duration::ZERO), "delay")?;
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;

        let stored = Job {
            id: JobId(id),
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            attempts: 0,
            max_retries: job.max_retries,
            status: JobStatus::Pending,
            process_at,
            reserved_at: None,
            reserved_by: None,
            locked_until: None,
            created_at: now,
            completed_at: None,
            failed_at: None,
            error: None,
        };
        table.rows.insert(id, stored.clone());

        Ok(JobRow::from_job(&stored))
    }

    async fn get(&self, job_id: i64) -> Result<Option<JobRow>, StoreError> {
        Ok(self.lock().rows.get(&job_id).map(JobRow::from_job))
    }

    async fn claim_next(
        &self,
        queues: &[String],
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<JobRow>, StoreError> {
        let now = self.clock.now();
        let locked_until = Self::shifted(now, lease, "lease")?;
        let mut table = self.lock();

        // Step 1: Highest priority first, then oldest, then lowest id.
        let next = table
            .rows
            .values()
            .filter(|job| queues.contains(&job.queue) && job.is_claimable_at(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|job| job.id.0);

        let Some(job_id) = next else {
            return Ok(None);
        };

        // Step 2: Issue a lease token strictly newer than any issued before.
        let token = match table.last_token {
            Some(last) if last >= now => last.plus(Duration::microseconds(1)),
            _ => now,
        };
        table.last_token = Some(token);

        let job = table.rows.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        Self::transition(job, JobStatus::Processing)?;
        job.attempts = job.attempts.saturating_add(1);
        job.reserved_at = Some(token);
        job.reserved_by = Some(worker_id.to_string());
        job.locked_until = Some(locked_until);
        job.error = None;

        Ok(Some(JobRow::from_job(job)))
    }

    async fn fail_exhausted_leases(&self, queues: &[String]) -> Result<Vec<JobRow>, StoreError> {
        let now = self.clock.now();
        let mut table = self.lock();
        let mut failed = Vec::new();
        for job in table.rows.values_mut() {
            if queues.contains(&job.queue) && job.is_lease_exhausted_at(now) == Some(true) {
                Self::transition(job, JobStatus::Failed)?;
                Self::release(job);
                job.failed_at = Some(now);
                job.error = Some(LEASE_EXHAUSTED.to_string());
                failed.push(JobRow::from_job(job));
            }
        }
        Ok(failed)
    }

    async fn renew_lease(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        lease: Duration,
    ) -> Result<JobRow, StoreError> {
        let now = self.clock.now();
        let locked_until = Self::shifted(now, lease, "lease")?;
        let mut table = self.lock();
        let job = Self::leased_row(&mut table, job_id, reserved_at)?;
        job.locked_until = Some(locked_until);
        Ok(JobRow::from_job(job))
    }

    async fn mark_completed(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
    ) -> Result<JobRow, StoreError> {
        let now = self.clock.now();
        let mut table = self.lock();
        let job = Self::leased_row(&mut table, job_id, reserved_at)?;
        Self::transition(job, JobStatus::Completed)?;
        Self::release(job);
        job.completed_at = Some(now);
        job.error = None;
        Ok(JobRow::from_job(job))
    }

    async fn mark_failed_retryable(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
        backoff: Duration,
    ) -> Result<JobRow, StoreError> {
        let now = self.clock.now();
        let process_at = Self::shifted(now, backoff.max(Duration::ZERO), "backoff")?;
        let mut table = self.lock();
        let job = Self::leased_row(&mut table, job_id, reserved_at)?;
        Self::transition(job, JobStatus::Pending)?;
        Self::release(job);
        job.process_at = process_at;
        job.error = Some(error.to_string());
        Ok(JobRow::from_job(job))
    }

    async fn mark_failed_permanent(
        &self,
        job_id: i64,
        reserved_at: OffsetDateTime,
        error: &str,
    ) -> Result<JobRow, StoreError> {
        let now = self.clock.now();
        let mut table = self.lock();
        let job = Self::leased_row(&mut table, job_id, reserved_at)?;
        Self::transition(job, JobStatus::Failed)?;
        Self::release(job);
        job.failed_at = Some(now);
        job.error = Some(error.to_string());
        Ok(JobRow::from_job(job))
    }

    async fn eligible_count(&self, queues: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let table = self.lock();
        let count = table
            .rows
            .values()
            .filter(|job| queues.contains(&job.queue) && job.is_claimable_at(now))
            .count();
        Ok(count as u64)
    }
}
