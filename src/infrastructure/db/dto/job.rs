use crate::domain::entities::job::{Job, JobStatus};
use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use crate::infrastructure::db::stores::job_store::StoreError;
use time::OffsetDateTime;

/// Column list shared by every query returning a full `queue_jobs` row.
pub const JOB_COLUMNS: &str = "id, queue, payload, priority, attempts, max_retries, status, \
     process_at, reserved_at, reserved_by, locked_until, created_at, completed_at, failed_at, error";

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    pub queue: String,
    pub payload: String,
    pub priority: i32,
    pub attempts: i32,
    pub max_retries: i32,
    pub status: String,
    pub process_at: OffsetDateTime,
    pub reserved_at: Option<OffsetDateTime>,
    pub reserved_by: Option<String>,
    pub locked_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub failed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl JobRow {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.0,
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            priority: job.priority,
            attempts: i32::try_from(job.attempts).unwrap_or(i32::MAX),
            max_retries: i32::try_from(job.max_retries).unwrap_or(i32::MAX),
            status: job.status.as_str().to_string(),
            process_at: job.process_at.as_inner(),
            reserved_at: job.reserved_at.map(|t| t.as_inner()),
            reserved_by: job.reserved_by.clone(),
            locked_until: job.locked_until.map(|t| t.as_inner()),
            created_at: job.created_at.as_inner(),
            completed_at: job.completed_at.map(|t| t.as_inner()),
            failed_at: job.failed_at.map(|t| t.as_inner()),
            error: job.error.clone(),
        }
    }

    pub fn into_job(self) -> Result<Job, StoreError> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("job {} has unknown status `{}`", self.id, self.status))
        })?;

        Ok(Job {
            id: JobId(self.id),
            queue: self.queue,
            payload: self.payload,
            priority: self.priority,
            attempts: self.attempts.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            status,
            process_at: Timestamp::from(self.process_at),
            reserved_at: self.reserved_at.map(Timestamp::from),
            reserved_by: self.reserved_by,
            locked_until: self.locked_until.map(Timestamp::from),
            created_at: Timestamp::from(self.created_at),
            completed_at: self.completed_at.map(Timestamp::from),
            failed_at: self.failed_at.map(Timestamp::from),
            error: self.error,
        })
    }
}
