use crate::application::context::AppContext;
use crate::application::jobs::builtin::{SyntheticJob, register_builtin};
use crate::application::jobs::registry::JobRegistry;
use crate::application::usecases::enqueue_job::{Dispatcher, EnqueueOptions};
use crate::application::usecases::worker_loop::{WorkerLoopError, WorkerLoopUseCase};
use crate::application::usecases::worker_manager::{WorkerLauncher, WorkerManager};
use crate::config::{Settings, WorkerMode};
use crate::domain::value_objects::ids::WorkerId;
use crate::infrastructure::db::postgres::PostgresDatabase;
use crate::infrastructure::db::repositories::Repositories;
use crate::infrastructure::process::signals::{request_stop, spawn_shutdown_listener};
use crate::infrastructure::process::{CHILD_FATAL_EXIT_CODE, ProcessLauncher, TaskLauncher};
use crate::interface::cli::{Command, EnqueueArgs, WorkArgs, WorkChildArgs};
use anyhow::Context;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Run one subcommand and map its result to a process exit code.
pub async fn run(command: Command, settings: Settings, config_file: Option<PathBuf>) -> ExitCode {
    let result = match command {
        Command::Migrate => migrate(&settings).await,
        Command::Work(args) => work(&settings, args, config_file.as_deref()).await,
        Command::Enqueue(args) => enqueue(&settings, args).await,
        Command::WorkChild(args) => return work_child(&settings, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %format!("{error:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Connect to the store and assemble the shared context.
async fn connect(settings: &Settings) -> anyhow::Result<(Repositories, Arc<AppContext>)> {
    // Step 1: Connect and prove the store answers.
    let db = PostgresDatabase::connect_with(&settings.postgres())
        .await
        .context("store unreachable")?;
    db.healthcheck().await.context("store unreachable")?;

    // Step 2: Register job types identically on every side of the queue.
    let mut registry = JobRegistry::new();
    register_builtin(&mut registry)?;

    // Step 3: Assemble the shared application context.
    let repos = Repositories::postgres(Arc::new(db));
    let ctx = AppContext::new(repos.clone(), Arc::new(registry), settings.lease_manager());
    Ok((repos, Arc::new(ctx)))
}

async fn migrate(settings: &Settings) -> anyhow::Result<()> {
    let (repos, _) = connect(settings).await?;
    repos.migrate().await.context("failed to create schema")?;
    Ok(())
}

async fn enqueue(settings: &Settings, args: EnqueueArgs) -> anyhow::Result<()> {
    let (_, ctx) = connect(settings).await?;

    let job = SyntheticJob {
        label: args.label,
        sleep_ms: args.sleep_ms,
        fail: args.fail,
    };
    let mut options = EnqueueOptions::default()
        .delayed_by(time::Duration::milliseconds(
            i64::try_from(args.delay_ms).context("delay is too large")?,
        ));
    options.queue = args.queue;
    options.priority = args.priority;
    options.max_retries = args.max_retries;

    let id = Dispatcher::enqueue(&ctx, &job, options).await?;
    println!("{id}");
    Ok(())
}

async fn work(
    settings: &Settings,
    args: WorkArgs,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let count = args.workers.unwrap_or(settings.workers.count);
    let queues = args.queues.unwrap_or_else(|| settings.workers.queues.clone());
    let mode = args.mode.unwrap_or(settings.workers.mode);

    // Step 1: Fail fast when the store is unreachable.
    let (_, ctx) = connect(settings).await?;
    let backlog = ctx.repos.job.eligible_count(&queues).await?;
    info!(eligible = backlog, queues = ?queues, mode = ?mode, "store reachable");

    // Step 2: Pick how workers are isolated.
    let launcher: Arc<dyn WorkerLauncher> = match mode {
        WorkerMode::Process => {
            let mut extra = Vec::new();
            if let Some(path) = config_file {
                extra.push("--config".to_string());
                extra.push(path.display().to_string());
            }
            if args.exit_when_empty {
                extra.push("--exit-when-empty".to_string());
            }
            Arc::new(
                ProcessLauncher::current_exe()
                    .context("cannot locate worker binary")?
                    .with_extra_args(extra),
            )
        }
        WorkerMode::Task => {
            let mut loop_config = settings.worker_loop();
            loop_config.exit_when_empty = args.exit_when_empty;
            Arc::new(TaskLauncher::new(ctx, loop_config))
        }
    };

    // Step 3: Wire signals to the shared stop flag.
    let (stop_tx, stop_rx) = watch::channel(false);
    let signals = spawn_shutdown_listener(Arc::new(stop_tx));

    // Step 4: Supervise until every worker has exited.
    let manager = WorkerManager::new(
        launcher,
        Duration::from_millis(settings.workers.restart_delay_ms),
    );
    let outcome = manager.start(count, queues, stop_rx).await;
    signals.abort();

    let report = outcome?;
    info!(clean = report.clean, restarts = report.restarts, "all workers exited");
    Ok(())
}

async fn work_child(settings: &Settings, args: WorkChildArgs) -> ExitCode {
    let worker_id = WorkerId(args.worker_id);
    let fatal = ExitCode::from(CHILD_FATAL_EXIT_CODE as u8);

    // Step 1: A child that cannot reach the store reports a fatal exit.
    let ctx = match connect(settings).await {
        Ok((_, ctx)) => ctx,
        Err(error) => {
            error!(worker_id = %worker_id, error = %format!("{error:#}"), "worker cannot start");
            return fatal;
        }
    };

    // Step 2: Stop on our own signals or when the supervisor closes stdin.
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    watch_parent_stdin(stop_tx.clone());
    let signals = spawn_shutdown_listener(stop_tx);

    // Step 3: Run the loop.
    let mut config = settings.worker_loop();
    config.queues = args.queues;
    config.exit_when_empty = args.exit_when_empty;
    let result = WorkerLoopUseCase::run(ctx, worker_id.clone(), config, stop_rx).await;
    signals.abort();

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(WorkerLoopError::NoQueues) => {
            error!(worker_id = %worker_id, "worker started without queues");
            fatal
        }
    }
}

/// Request stop once stdin reaches EOF.
///
/// Runs on a detached OS thread: a blocking stdin read cannot be cancelled
/// and must not hold up process exit.
fn watch_parent_stdin(stop: Arc<watch::Sender<bool>>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0_u8; 64];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        if request_stop(&stop) {
            info!("supervisor closed stdin, stopping");
        }
    });
}
