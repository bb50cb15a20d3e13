use crate::application::jobs::context::JobContext;
use crate::application::jobs::registry::{JobRegistry, QueueJob, RegistryError};
use crate::domain::entities::failure::HandlerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Operator smoke-test job: sleeps, then succeeds or fails on request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticJob {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default)]
    pub fail: bool,
}

#[async_trait]
impl QueueJob for SyntheticJob {
    const JOB_TYPE: &'static str = "forge.synthetic";

    async fn handle(&self, ctx: &JobContext) -> Result<(), HandlerError> {
        if self.sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        }

        if self.fail {
            return Err(HandlerError::new(format!(
                "synthetic job `{}` failed on request",
                self.label
            )));
        }

        info!(
            job_id = %ctx.job_id(),
            label = %self.label,
            attempts = ctx.attempts(),
            "synthetic job done"
        );
        Ok(())
    }

    async fn on_permanent_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()> {
        warn!(job_id = %ctx.job_id(), label = %self.label, error, "synthetic job gave up");
        Ok(())
    }
}

/// Register the job types shipped with the binary.
pub fn register_builtin(registry: &mut JobRegistry) -> Result<(), RegistryError> {
    registry.register::<SyntheticJob>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ids::JobId;

    #[tokio::test]
    async fn given_fail_flag_when_handled_should_return_retryable_error() {
        let job = SyntheticJob {
            label: "smoke".into(),
            sleep_ms: 0,
            fail: true,
        };

        let err = QueueJob::handle(&job, &JobContext::detached(JobId(1), "default", 1))
            .await
            .unwrap_err();

        assert!(err.retryable);
        assert!(err.message.contains("smoke"));
    }

    #[tokio::test(start_paused = true)]
    async fn given_sleep_when_handled_should_wait_then_succeed() {
        let job = SyntheticJob {
            label: "nap".into(),
            sleep_ms: 5_000,
            fail: false,
        };
        let started = tokio::time::Instant::now();

        QueueJob::handle(&job, &JobContext::detached(JobId(2), "default", 1))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(5_000));
    }

    #[test]
    fn given_partial_args_when_deserialized_should_fill_defaults() {
        let job: SyntheticJob = serde_json::from_str(r#"{"label":"x"}"#).unwrap();
        assert_eq!(job.sleep_ms, 0);
        assert!(!job.fail);
    }
}
