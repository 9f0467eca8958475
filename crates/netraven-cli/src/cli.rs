use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "netraven",
    about = "NetRaven job execution subsystem: scheduler, dispatcher, and device workers",
    version
)]
pub struct Cli {
    /// Talk to a running server instead of operating on the local store.
    #[arg(long, env = "NETRAVEN_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for `--remote` calls. Falls back to `~/.netraven/token`.
    #[arg(long, env = "NETRAVEN_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler, dispatcher, and HTTP API in-process.
    Serve {
        /// Path to the runtime configuration YAML (see spec §6's
        /// configuration keys).
        #[arg(long, default_value = "netraven.yaml")]
        config: PathBuf,

        /// Generate a fresh bearer token even if one is cached.
        #[arg(long)]
        rotate_token: bool,
    },

    /// Trigger an immediate run of a job definition.
    Trigger {
        job_definition_id: Uuid,

        /// Restrict the run to these device ids (otherwise resolves the
        /// definition's full target set).
        #[arg(long = "device")]
        devices: Vec<Uuid>,
    },

    /// Show a job run's status and per-device results.
    Status { job_run_id: Uuid },

    /// Show or follow a job run's log entries.
    Logs {
        job_run_id: Uuid,

        #[arg(long)]
        device: Option<Uuid>,

        /// Stream new entries as they arrive instead of printing history.
        #[arg(long)]
        follow: bool,
    },

    /// Request cancellation of a running job run.
    Cancel { job_run_id: Uuid },

    /// Create a new job run restricted to a terminal run's FAILED devices.
    RetryFailed { job_run_id: Uuid },

    /// List active job definitions.
    JobDefs,

    /// List registered job-type handlers and their metadata.
    Handlers,

    /// Write rows directly to the local store — the CLI's bootstrap path
    /// for devices/tags/credentials/job definitions (administrative CRUD
    /// belongs to the REST surface this core does not implement). Requires
    /// `--config`, not `--remote`.
    Seed {
        #[arg(long, default_value = "netraven.yaml")]
        config: PathBuf,

        #[command(subcommand)]
        command: SeedCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SeedCommand {
    /// Create or replace a tag. Prints the generated id.
    Tag {
        #[arg(long)]
        name: String,
        #[arg(long)]
        kind: String,
    },

    /// Create or replace a device.
    Device {
        #[arg(long)]
        hostname: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        family: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long = "tag")]
        tags: Vec<Uuid>,
    },

    /// Create or replace a credential. The secret is read from an
    /// environment variable so it never appears in shell history.
    Credential {
        #[arg(long)]
        username: String,
        /// Name of the environment variable holding the plaintext secret.
        #[arg(long)]
        secret_env: String,
        #[arg(long, default_value_t = 100)]
        priority: i32,
        #[arg(long = "tag")]
        tags: Vec<Uuid>,
    },

    /// Create or replace a job definition.
    JobDef {
        #[arg(long)]
        name: String,
        /// Registry key, e.g. "backup" or "reachability".
        #[arg(long = "type")]
        job_type: String,
        #[arg(long)]
        device: Option<Uuid>,
        #[arg(long = "tag")]
        tags: Vec<Uuid>,
        #[arg(long)]
        interval_seconds: Option<u64>,
        #[arg(long)]
        fire_immediately: bool,
        #[arg(long)]
        cron: Option<String>,
        /// RFC3339 timestamp for a one-time schedule.
        #[arg(long)]
        once: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
}
