use crate::domain::value_objects::ids::JobId;
use crate::domain::value_objects::timestamps::Timestamp;
use serde::{Deserialize, Serialize};

/// Queue used when a job does not name one.
pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Named priority bands. Higher values are served first; any `i32` is valid.
pub struct Priority;

impl Priority {
    pub const LOW: i32 = -10;
    pub const NORMAL: i32 = 0;
    pub const HIGH: i32 = 10;
    pub const CRITICAL: i32 = 20;
}

/// Exclusive, time-bounded ownership of a job.
///
/// `reserved_at` doubles as the ownership token: a reclaim always writes a new
/// value, so finalizing with a stale lease is detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub reserved_at: Timestamp,
    pub locked_until: Timestamp,
}

impl Lease {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.locked_until <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: String,
    pub priority: i32,
    pub attempts: u32,
    pub max_retries: u32,
    pub status: JobStatus,
    pub process_at: Timestamp,
    pub reserved_at: Option<Timestamp>,
    pub reserved_by: Option<String>,
    pub locked_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl Job {
    /// The lease currently recorded on the row, if any.
    pub fn lease(&self) -> Option<Lease> {
        match (self.reserved_at, self.locked_until) {
            (Some(reserved_at), Some(locked_until)) => Some(Lease {
                job_id: self.id,
                reserved_at,
                locked_until,
            }),
            _ => None,
        }
    }

    /// Whether a claim at `now` may take this job.
    ///
    /// A `Processing` row whose lease has lapsed counts as `Pending`, unless
    /// its attempt budget is already spent.
    pub fn is_claimable_at(&self, now: Timestamp) -> bool {
        if self.process_at > now {
            return false;
        }
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Processing => self.is_lease_exhausted_at(now) == Some(false),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// For a `Processing` row whose lease lapsed by `now`: whether the lapsed
    /// run was its final attempt. `None` while the lease is live or for any
    /// other status.
    pub fn is_lease_exhausted_at(&self, now: Timestamp) -> Option<bool> {
        let lapsed = self.status == JobStatus::Processing
            && self.locked_until.is_none_or(|until| until <= now);
        lapsed.then(|| !self.has_attempts_remaining())
    }

    /// Total executions this job may receive (the first run plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another execution is allowed after the current one fails.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts()
    }
}

/// Everything the dispatcher supplies when creating a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub queue: String,
    pub payload: String,
    pub priority: i32,
    pub max_retries: u32,
    /// Delay relative to the store's clock before the job becomes eligible.
    pub delay: time::Duration,
}
