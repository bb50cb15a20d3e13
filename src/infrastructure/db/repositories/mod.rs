pub mod factory;
pub mod job_repository;

pub use factory::Repositories;
pub use job_repository::JobRepository;
