use crate::application::usecases::worker_manager::{WorkerExit, WorkerLauncher, stop_requested};
use crate::domain::value_objects::ids::WorkerId;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Exit code of a child that could not start working (e.g. store unreachable).
pub const CHILD_FATAL_EXIT_CODE: i32 = 2;

/// Runs each worker in its own OS process.
///
/// Children get `--worker-id <id> --queues <a,b>` appended to the configured
/// arguments. Stop is requested by closing the child's stdin; the child
/// finishes its current job and exits on its own.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            extra_args: Vec::new(),
        }
    }

    /// Re-execute the running binary as `work-child`.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["work-child".to_string()]))
    }

    /// Arguments appended after the worker id and queue list.
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    fn command(&self, worker_id: &WorkerId, queues: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--worker-id")
            .arg(worker_id.as_str())
            .arg("--queues")
            .arg(queues.join(","))
            .args(&self.extra_args)
            .stdin(Stdio::piped());
        command
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        worker_id: WorkerId,
        queues: Vec<String>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<WorkerExit> {
        let command = self.command(&worker_id, &queues);
        tokio::spawn(supervise_child(command, worker_id, stop))
    }
}

async fn supervise_child(
    mut command: Command,
    worker_id: WorkerId,
    mut stop: watch::Receiver<bool>,
) -> WorkerExit {
    // Step 1: Spawn the child.
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => return WorkerExit::Fatal(format!("failed to spawn worker process: {error}")),
    };
    info!(worker_id = %worker_id, pid = ?child.id(), "worker process started");

    // Step 2: Wait for exit, closing stdin once stop is requested.
    let mut stdin = child.stdin.take();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = stop_requested(&mut stop), if stdin.is_some() => {
                debug!(worker_id = %worker_id, "asking worker process to stop");
                stdin = None;
            }
        }
    };

    // Step 3: Classify the exit.
    match status {
        Ok(status) if status.success() => WorkerExit::Clean,
        Ok(status) if status.code() == Some(CHILD_FATAL_EXIT_CODE) => {
            WorkerExit::Fatal(format!("worker process exited with {status}"))
        }
        Ok(status) => WorkerExit::Crashed(format!("worker process exited with {status}")),
        Err(error) => {
            warn!(worker_id = %worker_id, %error, "lost track of worker process");
            WorkerExit::Crashed(format!("failed to wait for worker process: {error}"))
        }
    }
}
