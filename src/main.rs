use clap::Parser;
use forge_queue::config;
use forge_queue::infrastructure::process::CHILD_FATAL_EXIT_CODE;
use forge_queue::interface::cli::{Cli, Command, commands};
use forge_queue::observability;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Step 1: Parse arguments.
    let cli = Cli::parse();

    // Step 2: Load configuration.
    let settings = match config::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("forge-queue: {error}");
            return match cli.command {
                Command::WorkChild(_) => ExitCode::from(CHILD_FATAL_EXIT_CODE as u8),
                _ => ExitCode::FAILURE,
            };
        }
    };

    // Step 3: Install logging.
    observability::init_tracing(&settings.logging);

    // Step 4: Run the command.
    commands::run(cli.command, settings, cli.config).await
}
