mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, rotate_token } => commands::serve(config, rotate_token).await,
        Command::Trigger { job_definition_id, devices } => {
            commands::trigger(cli.remote, cli.token, job_definition_id, devices).await
        }
        Command::Status { job_run_id } => commands::show_status(cli.remote, cli.token, job_run_id).await,
        Command::Logs { job_run_id, device, follow } => {
            commands::logs(cli.remote, cli.token, job_run_id, device, follow).await
        }
        Command::Cancel { job_run_id } => commands::cancel(cli.remote, cli.token, job_run_id).await,
        Command::RetryFailed { job_run_id } => commands::retry_failed(cli.remote, cli.token, job_run_id).await,
        Command::JobDefs => commands::job_defs(cli.remote, cli.token).await,
        Command::Handlers => commands::handlers(cli.remote, cli.token).await,
        Command::Seed { config, command } => commands::seed(config, command).await,
    }
}
