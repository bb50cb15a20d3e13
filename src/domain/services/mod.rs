pub mod clock;
pub mod failure_classifier;
pub mod lease_manager;
