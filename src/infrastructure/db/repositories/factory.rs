use std::sync::Arc;

use crate::infrastructure::db::database::{Database, DatabaseError};
use crate::infrastructure::db::memory::InMemoryJobStore;
use crate::infrastructure::db::postgres::schema;
use crate::infrastructure::db::postgres::{JobStorePostgres, PostgresDatabase};
use crate::infrastructure::db::repositories::job_repository::JobRepository;

#[derive(Clone)]
pub struct Repositories {
    pub db: Option<Arc<PostgresDatabase>>,
    pub job: Arc<JobRepository>,
}

impl Repositories {
    /// Build all repositories backed by Postgres stores.
    pub fn postgres(db: Arc<PostgresDatabase>) -> Self {
        let job_store = Arc::new(JobStorePostgres::new(db.clone()));

        Self {
            db: Some(db),
            job: Arc::new(JobRepository::new(job_store)),
        }
    }

    /// Build repositories over a process-local store.
    pub fn in_memory(store: Arc<InMemoryJobStore>) -> Self {
        Self {
            db: None,
            job: Arc::new(JobRepository::new(store)),
        }
    }

    /// Create the job table. A no-op for in-memory repositories.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let Some(db) = self.db.as_ref() else {
            return Ok(());
        };
        schema::ensure_schema(db.as_ref() as &dyn Database).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn given_in_memory_repositories_when_migrating_should_do_nothing() {
        let repos = Repositories::in_memory(Arc::new(InMemoryJobStore::default()));

        repos.migrate().await.unwrap();

        assert!(repos.db.is_none());
    }
}
