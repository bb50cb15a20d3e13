use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned job identifier. Ids grow monotonically with insertion order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label identifying one worker loop, recorded on the rows it claims.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Build a worker label from the owning process id and its slot in the pool.
    pub fn for_slot(pid: u32, slot: usize) -> Self {
        Self(format!("worker-{pid}-{slot}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
