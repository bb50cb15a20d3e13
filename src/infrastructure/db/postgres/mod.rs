mod database;
pub mod job_store_postgres;
pub mod schema;

pub use database::{PostgresConfig, PostgresDatabase};
pub use job_store_postgres::JobStorePostgres;
