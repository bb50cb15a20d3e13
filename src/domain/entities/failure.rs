use std::any::Any;
use thiserror::Error;

/// Failure raised by a job body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    /// A failure that may succeed on a later attempt.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that retrying cannot fix; the job fails permanently.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(format!("{error:#}"))
    }
}

/// Payload that cannot be turned back into a registered job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unknown job type `{0}`")]
    UnknownJobType(String),
    #[error("invalid arguments for `{job_type}`: {reason}")]
    InvalidArguments { job_type: String, reason: String },
}

/// Why an execution attempt did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    Handler(HandlerError),
    Decode(DecodeError),
    Panic(String),
}

impl JobFailure {
    /// Whether the failure class permits another attempt at all.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobFailure::Handler(error) => error.retryable,
            JobFailure::Decode(_) => false,
            JobFailure::Panic(_) => true,
        }
    }

    /// Turn a caught panic payload into a failure.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        JobFailure::Panic(message)
    }

    pub fn message(&self) -> String {
        match self {
            JobFailure::Handler(error) => error.message.clone(),
            JobFailure::Decode(error) => error.to_string(),
            JobFailure::Panic(message) => format!("job panicked: {message}"),
        }
    }
}
