pub mod process_launcher;
pub mod signals;
pub mod task_launcher;

pub use process_launcher::{CHILD_FATAL_EXIT_CODE, ProcessLauncher};
pub use task_launcher::TaskLauncher;
