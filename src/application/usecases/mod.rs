pub mod claim_next_job;
pub mod enqueue_job;
pub mod record_job_failure;
pub mod renew_lease;
pub mod run_worker_once;
pub mod worker_loop;
pub mod worker_manager;
