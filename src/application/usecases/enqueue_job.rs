// Use case: enqueue_job.

use crate::application::context::AppContext;
use crate::application::jobs::codec;
use crate::application::jobs::registry::{JobDefaults, QueueJob};
use crate::domain::entities::job::NewJob;
use crate::domain::value_objects::ids::JobId;
use crate::infrastructure::db::stores::job_store::StoreError;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use time::Duration;
use tracing::info;

/// Per-call overrides. Unset fields fall back to the job type's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub priority: Option<i32>,
    pub delay: Duration,
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delayed_by(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("queue name must not be empty")]
    EmptyQueue,
    #[error("delay must not be negative")]
    NegativeDelay,
    #[error("job type `{0}` is not registered")]
    UnknownJobType(String),
    #[error("job arguments are not serializable: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// The only way new work enters the queue.
pub struct Dispatcher;

impl Dispatcher {
    /// Serialize `job` and store it as a new pending row.
    pub async fn enqueue<J: QueueJob>(
        ctx: &AppContext,
        job: &J,
        options: EnqueueOptions,
    ) -> Result<JobId, EnqueueError> {
        let args = serde_json::to_value(job)?;
        Self::enqueue_raw(ctx, J::JOB_TYPE, args, options).await
    }

    /// Store a job from its type tag and already-serialized arguments.
    pub async fn enqueue_raw(
        ctx: &AppContext,
        job_type: &str,
        args: Value,
        options: EnqueueOptions,
    ) -> Result<JobId, EnqueueError> {
        // Step 1: The type must be known so that a worker can hydrate it.
        let defaults: JobDefaults = ctx
            .registry
            .defaults(job_type)
            .cloned()
            .ok_or_else(|| EnqueueError::UnknownJobType(job_type.to_string()))?;

        // Step 2: Resolve and validate the placement.
        let queue = options.queue.unwrap_or_else(|| defaults.queue.to_string());
        if queue.trim().is_empty() {
            return Err(EnqueueError::EmptyQueue);
        }
        if options.delay.is_negative() {
            return Err(EnqueueError::NegativeDelay);
        }

        // Step 3: Encode and persist.
        let new_job = NewJob {
            queue,
            payload: codec::encode_raw(job_type, args)?,
            priority: options.priority.unwrap_or(defaults.priority),
            max_retries: options.max_retries.unwrap_or(defaults.max_retries),
            delay: options.delay,
        };
        let stored = ctx.repos.job.insert(&new_job).await?;

        counter!("jobs_enqueued_total", "queue" => stored.queue.clone()).increment(1);
        info!(
            job_id = %stored.id,
            job_type,
            queue = %stored.queue,
            priority = stored.priority,
            delay_ms = options.delay.whole_milliseconds() as i64,
            "job enqueued"
        );

        Ok(stored.id)
    }
}
