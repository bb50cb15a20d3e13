use crate::domain::workflows::retry_policy::RetryPolicy;
use std::collections::HashMap;
use time::Duration;

/// Owns the numeric policy around leases and retry backoff.
///
/// Storage mechanics live in the job store; this type only answers "how long"
/// questions.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    default_lease: Duration,
    queue_leases: HashMap<String, Duration>,
    retry_policy: RetryPolicy,
}

impl LeaseManager {
    pub fn new(default_lease: Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            default_lease,
            queue_leases: HashMap::new(),
            retry_policy,
        }
    }

    /// Override the lease window for a single queue.
    pub fn with_queue_lease(mut self, queue: impl Into<String>, lease: Duration) -> Self {
        self.queue_leases.insert(queue.into(), lease);
        self
    }

    /// Lease window granted to jobs claimed from `queue`.
    pub fn lease_duration(&self, queue: &str) -> Duration {
        self.queue_leases
            .get(queue)
            .copied()
            .unwrap_or(self.default_lease)
    }

    /// Lease window for a claim spanning several queues.
    ///
    /// The claimed row's queue is only known after the claim, so the longest
    /// window among the subscribed queues is used.
    pub fn lease_duration_for(&self, queues: &[String]) -> Duration {
        queues
            .iter()
            .map(|queue| self.lease_duration(queue))
            .max()
            .unwrap_or(self.default_lease)
    }

    /// Delay before a job that has run `attempts` times becomes eligible again.
    pub fn compute_backoff(&self, attempts: u32, jitter_seed: u64) -> Duration {
        self.retry_policy.next_delay(attempts, jitter_seed)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new(Duration::seconds(60), RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_no_override_when_lease_duration_should_use_default() {
        let manager = LeaseManager::default();
        assert_eq!(manager.lease_duration("default"), Duration::seconds(60));
    }

    #[test]
    fn given_queue_override_when_lease_duration_should_use_override() {
        let manager =
            LeaseManager::default().with_queue_lease("reports", Duration::minutes(10));

        assert_eq!(manager.lease_duration("reports"), Duration::minutes(10));
        assert_eq!(manager.lease_duration("emails"), Duration::seconds(60));
    }

    #[test]
    fn given_several_queues_when_lease_duration_for_should_take_longest() {
        let manager = LeaseManager::default()
            .with_queue_lease("fast", Duration::seconds(5))
            .with_queue_lease("slow", Duration::minutes(5));
        let queues = vec!["fast".to_string(), "slow".to_string()];

        assert_eq!(manager.lease_duration_for(&queues), Duration::minutes(5));
        assert_eq!(manager.lease_duration_for(&[]), Duration::seconds(60));
    }

    #[test]
    fn given_attempts_when_compute_backoff_should_follow_retry_policy() {
        let policy = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 2_000,
            jitter_ms: 0,
        };
        let manager = LeaseManager::new(Duration::seconds(30), policy);

        assert_eq!(manager.compute_backoff(1, 0), Duration::milliseconds(500));
        assert_eq!(manager.compute_backoff(2, 0), Duration::milliseconds(1_000));
        assert_eq!(manager.compute_backoff(9, 0), Duration::milliseconds(2_000));
    }
}
