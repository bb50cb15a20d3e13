pub mod context;
pub mod jobs;
pub mod usecases;
