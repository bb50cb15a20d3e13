use crate::infrastructure::db::database::{Database, DatabaseError};
use tracing::info;

/// DDL for the job table and its claim indexes. Every statement is idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../../../migrations/0001_create_queue_jobs.sql");

/// Create the job table if it does not exist yet.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DatabaseError> {
    db.execute(SCHEMA_SQL).await?;
    info!(table = "queue_jobs", "schema ensured");
    Ok(())
}
