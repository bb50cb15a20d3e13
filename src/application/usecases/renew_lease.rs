// Use case: renew_lease.

use crate::application::context::AppContext;
use crate::domain::entities::failure::HandlerError;
use crate::domain::entities::job::Lease;
use crate::infrastructure::db::stores::job_store::StoreError;
use thiserror::Error;
use tracing::{debug, warn};

/// Pushes `locked_until` forward for a job the caller still owns.
pub struct RenewLeaseUseCase;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenewLeaseError {
    /// Another worker reclaimed the job; the caller must stop working on it.
    #[error("lease lost")]
    LeaseLost,
    #[error("job not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RenewLeaseError> for HandlerError {
    fn from(error: RenewLeaseError) -> Self {
        HandlerError::new(error.to_string())
    }
}

impl RenewLeaseUseCase {
    /// Extend `lease` by the lease window configured for `queue`.
    pub async fn execute(
        ctx: &AppContext,
        lease: &Lease,
        queue: &str,
    ) -> Result<Lease, RenewLeaseError> {
        // Step 1: Resolve the lease window for this queue.
        let duration = ctx.leases.lease_duration(queue);

        // Step 2: Renew only if our reservation token still matches.
        let renewed = ctx
            .repos
            .job
            .renew_lease(lease, duration)
            .await
            .map_err(|e| match e {
                StoreError::LeaseLost => RenewLeaseError::LeaseLost,
                StoreError::NotFound => RenewLeaseError::NotFound,
                other => RenewLeaseError::Storage(other.to_string()),
            });

        match &renewed {
            Ok(next) => debug!(
                job_id = %lease.job_id,
                locked_until = %next.locked_until.as_inner(),
                "lease renewed"
            ),
            Err(RenewLeaseError::LeaseLost) => {
                warn!(job_id = %lease.job_id, "lease lost while renewing")
            }
            Err(_) => {}
        }

        renewed
    }
}
