pub mod failure;
pub mod job;
