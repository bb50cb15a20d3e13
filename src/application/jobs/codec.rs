use crate::application::jobs::registry::{ErasedJob, JobRegistry, QueueJob};
use crate::domain::entities::failure::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored form of a job: its type tag plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub job: String,
    pub args: Value,
}

/// Encode a typed job into a storable payload.
pub fn encode<J: QueueJob>(job: &J) -> Result<String, serde_json::Error> {
    let args = serde_json::to_value(job)?;
    encode_raw(J::JOB_TYPE, args)
}

/// Encode an already-serialized argument value for `job_type`.
pub fn encode_raw(job_type: &str, args: Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        job: job_type.to_string(),
        args,
    })
}

/// Split a payload back into its type tag and arguments.
pub fn decode(payload: &str) -> Result<Envelope, DecodeError> {
    let envelope: Envelope =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if envelope.job.is_empty() {
        return Err(DecodeError::Malformed("empty job type".to_string()));
    }
    Ok(envelope)
}

/// Decode a payload and build the registered job it names.
pub fn hydrate(registry: &JobRegistry, payload: &str) -> Result<Box<dyn ErasedJob>, DecodeError> {
    let Envelope { job, args } = decode(payload)?;
    match registry.instantiate(&job, args) {
        None => Err(DecodeError::UnknownJobType(job)),
        Some(Err(e)) => Err(DecodeError::InvalidArguments {
            job_type: job,
            reason: e.to_string(),
        }),
        Some(Ok(built)) => Ok(built),
    }
}
