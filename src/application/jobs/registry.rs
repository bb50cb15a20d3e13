use crate::application::jobs::context::JobContext;
use crate::domain::entities::failure::HandlerError;
use crate::domain::entities::job::{DEFAULT_QUEUE, Priority};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A unit of background work that can be stored and executed later.
///
/// The serialized form of `Self` is the job's arguments.
#[async_trait]
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the job type.
    ///
    /// This MUST be unique for the whole application and stable across deploys,
    /// since it is persisted in every payload.
    const JOB_TYPE: &'static str;

    /// Queue used when the caller does not pick one.
    const QUEUE: &'static str = DEFAULT_QUEUE;

    /// Priority used when the caller does not pick one.
    const PRIORITY: i32 = Priority::NORMAL;

    /// Retries after the first attempt before the job fails permanently.
    const MAX_RETRIES: u32 = 1;

    async fn handle(&self, ctx: &JobContext) -> Result<(), HandlerError>;

    /// Called after a failed attempt that will be retried.
    async fn on_failure(&self, _ctx: &JobContext, _error: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the job has failed for good.
    async fn on_permanent_failure(&self, _ctx: &JobContext, _error: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Object-safe view of a hydrated [`QueueJob`].
#[async_trait]
pub trait ErasedJob: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn handle(&self, ctx: &JobContext) -> Result<(), HandlerError>;

    async fn on_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()>;

    async fn on_permanent_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<J: QueueJob> ErasedJob for J {
    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }

    async fn handle(&self, ctx: &JobContext) -> Result<(), HandlerError> {
        QueueJob::handle(self, ctx).await
    }

    async fn on_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()> {
        QueueJob::on_failure(self, ctx, error).await
    }

    async fn on_permanent_failure(&self, ctx: &JobContext, error: &str) -> anyhow::Result<()> {
        QueueJob::on_permanent_failure(self, ctx, error).await
    }
}

type Factory = fn(Value) -> Result<Box<dyn ErasedJob>, serde_json::Error>;

fn hydrate<J: QueueJob>(args: Value) -> Result<Box<dyn ErasedJob>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<J>(args)?))
}

/// Per-type defaults applied by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    pub queue: &'static str,
    pub priority: i32,
    pub max_retries: u32,
}

struct Registration {
    factory: Factory,
    defaults: JobDefaults,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job type `{0}` is already registered")]
    AlreadyRegistered(String),
}

/// Lookup table from job type to constructor.
///
/// Producers and workers must register the same set of types.
#[derive(Default)]
pub struct JobRegistry {
    entries: HashMap<&'static str, Registration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<J: QueueJob>(&mut self) -> Result<(), RegistryError> {
        if self.entries.contains_key(J::JOB_TYPE) {
            return Err(RegistryError::AlreadyRegistered(J::JOB_TYPE.to_string()));
        }
        self.entries.insert(
            J::JOB_TYPE,
            Registration {
                factory: hydrate::<J>,
                defaults: JobDefaults {
                    queue: J::QUEUE,
                    priority: J::PRIORITY,
                    max_retries: J::MAX_RETRIES,
                },
            },
        );
        Ok(())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.entries.contains_key(job_type)
    }

    pub fn defaults(&self, job_type: &str) -> Option<&JobDefaults> {
        self.entries.get(job_type).map(|entry| &entry.defaults)
    }

    /// Build the job for `job_type` from its stored arguments.
    ///
    /// Returns `None` for an unregistered type.
    pub fn instantiate(
        &self,
        job_type: &str,
        args: Value,
    ) -> Option<Result<Box<dyn ErasedJob>, serde_json::Error>> {
        self.entries
            .get(job_type)
            .map(|entry| (entry.factory)(args))
    }

    pub fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.entries.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Greet {
        pub name: String,
    }

    #[async_trait]
    impl QueueJob for Greet {
        const JOB_TYPE: &'static str = "test.greet";
        const QUEUE: &'static str = "greetings";
        const PRIORITY: i32 = Priority::HIGH;
        const MAX_RETRIES: u32 = 3;

        async fn handle(&self, _ctx: &JobContext) -> Result<(), HandlerError> {
            if self.name.is_empty() {
                return Err(HandlerError::fatal("nobody to greet"));
            }
            Ok(())
        }
    }
}
