pub mod builtin;
pub mod codec;
pub mod context;
pub mod registry;

pub use context::JobContext;
pub use registry::{ErasedJob, JobRegistry, QueueJob, RegistryError};
