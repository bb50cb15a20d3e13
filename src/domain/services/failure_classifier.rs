use crate::domain::entities::failure::JobFailure;
use crate::domain::entities::job::Job;
use crate::domain::services::lease_manager::LeaseManager;
use time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Put the job back to `Pending`, eligible again after `backoff`.
    Retry { backoff: Duration },
    /// Record a terminal failure.
    Permanent,
}

/// Decides between retry and permanent failure for a failed attempt.
pub struct FailureClassifier;

impl FailureClassifier {
    /// `job.attempts` already counts the attempt that just failed.
    pub fn classify(job: &Job, failure: &JobFailure, leases: &LeaseManager) -> FailureDecision {
        // Step 1: Undecodable payloads and fatal handler errors never retry.
        if !failure.is_retryable() {
            return FailureDecision::Permanent;
        }

        // Step 2: Retry while the attempt budget (max_retries + 1) is not spent.
        if job.has_attempts_remaining() {
            let backoff = leases.compute_backoff(job.attempts, job.id.0 as u64);
            return FailureDecision::Retry { backoff };
        }

        FailureDecision::Permanent
    }
}
