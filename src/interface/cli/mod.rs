pub mod commands;

use crate::config::WorkerMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "forge-queue", version, about = "Persistent job queue and worker pool")]
pub struct Cli {
    /// Extra settings file layered over config/default.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the job table and its indexes
    Migrate,
    /// Start a supervised pool of workers
    Work(WorkArgs),
    /// Enqueue one synthetic job
    Enqueue(EnqueueArgs),
    /// Run a single worker loop (spawned by `work`)
    #[command(hide = true)]
    WorkChild(WorkChildArgs),
}

#[derive(Debug, Args)]
pub struct WorkArgs {
    /// Number of workers [default: workers.count]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Comma-separated queues to work [default: workers.queues]
    #[arg(short, long, value_delimiter = ',')]
    pub queues: Option<Vec<String>>,

    /// Worker isolation [default: workers.mode]
    #[arg(long, value_enum)]
    pub mode: Option<WorkerMode>,

    /// Stop each worker once it finds no eligible job
    #[arg(long)]
    pub exit_when_empty: bool,
}

#[derive(Debug, Args)]
pub struct WorkChildArgs {
    #[arg(long)]
    pub worker_id: String,

    #[arg(long, value_delimiter = ',', required = true)]
    pub queues: Vec<String>,

    #[arg(long)]
    pub exit_when_empty: bool,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Target queue [default: default]
    #[arg(long)]
    pub queue: Option<String>,

    /// Higher runs first
    #[arg(long, allow_hyphen_values = true)]
    pub priority: Option<i32>,

    /// Delay before the job becomes eligible
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Retries after the first failed attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long, default_value = "synthetic")]
    pub label: String,

    /// How long the job sleeps when run
    #[arg(long, default_value_t = 0)]
    pub sleep_ms: u64,

    /// Make every attempt fail
    #[arg(long)]
    pub fail: bool,
}
