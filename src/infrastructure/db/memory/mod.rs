pub mod job_store_memory;

pub use job_store_memory::InMemoryJobStore;
