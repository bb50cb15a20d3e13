use crate::application::context::AppContext;
use crate::application::usecases::renew_lease::{RenewLeaseError, RenewLeaseUseCase};
use crate::domain::entities::job::{Job, Lease};
use crate::domain::value_objects::ids::JobId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a running job can see about its own execution.
pub struct JobContext {
    job_id: JobId,
    queue: String,
    attempts: u32,
    max_retries: u32,
    lease: Option<Lease>,
    app: Option<Arc<AppContext>>,
    lease_lost: AtomicBool,
}

impl JobContext {
    /// Context for a job claimed from the store under `lease`.
    pub fn claimed(app: Arc<AppContext>, job: &Job, lease: Lease) -> Self {
        Self {
            job_id: job.id,
            queue: job.queue.clone(),
            attempts: job.attempts,
            max_retries: job.max_retries,
            lease: Some(lease),
            app: Some(app),
            lease_lost: AtomicBool::new(false),
        }
    }

    /// Context with no backing lease, for running a job body directly.
    /// Lease renewal always succeeds.
    pub fn detached(job_id: JobId, queue: impl Into<String>, attempts: u32) -> Self {
        Self {
            job_id,
            queue: queue.into(),
            attempts,
            max_retries: 0,
            lease: None,
            app: None,
            lease_lost: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Attempts made so far, including the current one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_retries.saturating_add(1)
    }

    /// Push the lease forward for long-running work.
    ///
    /// On `LeaseLost` the job belongs to another worker: return from the job
    /// body promptly. The worker will not finalize it.
    pub async fn renew_lease(&self) -> Result<(), RenewLeaseError> {
        let (Some(app), Some(lease)) = (self.app.as_ref(), self.lease.as_ref()) else {
            return Ok(());
        };

        match RenewLeaseUseCase::execute(app, lease, &self.queue).await {
            Ok(_) => Ok(()),
            Err(RenewLeaseError::LeaseLost) => {
                self.lease_lost.store(true, Ordering::SeqCst);
                Err(RenewLeaseError::LeaseLost)
            }
            Err(other) => Err(other),
        }
    }

    /// Whether a renewal found the job owned by someone else.
    pub fn lease_lost(&self) -> bool {
        self.lease_lost.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn given_detached_context_when_renewing_should_succeed_without_store() {
        let ctx = JobContext::detached(JobId(4), "mail", 1);

        ctx.renew_lease().await.unwrap();

        assert_eq!(ctx.job_id(), JobId(4));
        assert_eq!(ctx.queue(), "mail");
        assert!(!ctx.lease_lost());
        assert!(ctx.is_final_attempt());
    }
}
