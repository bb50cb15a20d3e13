use crate::domain::entities::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    Forbidden,
}

pub struct JobStateMachine;

impl JobStateMachine {
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Processing)
                // Reclaim of an expired lease.
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn transition(from: JobStatus, to: JobStatus) -> Result<JobStatus, TransitionError> {
        if Self::can_transition(from, to) {
            return Ok(to);
        }

        Err(TransitionError::Forbidden)
    }
}
