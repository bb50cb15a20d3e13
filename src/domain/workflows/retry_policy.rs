use time::Duration;

/// Backoff schedule applied between failed attempts of the same job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Return the backoff to apply after the `attempts`-th execution failed.
    ///
    /// `attempts` counts executions made so far, so the first failure passes 1.
    /// The jitter is derived from `jitter_seed`, keeping the result a pure
    /// function of its inputs.
    pub fn next_delay(&self, attempts: u32, jitter_seed: u64) -> Duration {
        // Step 1: Compute the exponential delay (2^(attempts-1)).
        let exponent = attempts.max(1) - 1;
        let raw = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(exponent));

        // Step 2: Cap at the max delay.
        let capped = raw.min(self.max_delay_ms);

        // Step 3: Optionally add a bounded jitter to spread retries.
        if self.jitter_ms == 0 {
            return millis(capped);
        }

        let jitter = jitter_seed % self.jitter_ms;
        millis(capped.saturating_add(jitter))
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            jitter_ms: 0,
        }
    }
}
