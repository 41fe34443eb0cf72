//! CLI type definitions: clap command structures for `sprintctl`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sprintctl")]
#[command(about = "Sprintforge - durable multi-agent sprint orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Base URL of a running orchestrator's REST surface, for `sprint`
    /// subcommands (the daemon started by `serve`).
    #[arg(long, global = true, env = "SPRINTCTL_SERVER", default_value = "http://127.0.0.1:7420")]
    pub server: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scaffold `.sprint/` in a target repository (config file, sprint root).
    Init {
        /// Force reinitialization even if already initialized
        #[arg(short, long)]
        force: bool,

        /// Target directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: std::path::PathBuf,
    },

    /// Run the orchestrator daemon: HTTP + `/ws` surface and every queue consumer.
    Serve {
        /// Override the bind port from config.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Sprint lifecycle and inspection commands against a running daemon.
    #[command(subcommand)]
    Sprint(SprintCommands),
}

#[derive(Subcommand)]
pub enum SprintCommands {
    /// Create a sprint from a spec file and target source tree.
    Create {
        /// Path to the feature specification file.
        spec_path: String,
        /// Path to the target source tree this sprint will modify.
        target_dir: String,
        /// Number of developer slots to use (defaults to server config).
        #[arg(short = 'd', long)]
        developer_count: Option<u32>,
        /// supervised, semi-auto, or full-auto (defaults to server config).
        #[arg(short, long)]
        autonomy_mode: Option<String>,
        /// Explicit sprint id (defaults to a generated date-prefixed slug).
        #[arg(long)]
        sprint_id: Option<String>,
        /// Display name.
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List all sprints.
    List,

    /// Show one sprint's full detail.
    Show {
        sprint_id: String,
    },

    /// Move a sprint from `created` to `researching`.
    Start {
        sprint_id: String,
    },

    /// Approve a plan awaiting approval.
    Approve {
        sprint_id: String,
    },

    /// Pause a running sprint.
    Pause {
        sprint_id: String,
    },

    /// Resume a paused sprint.
    Resume {
        sprint_id: String,
    },

    /// Cancel a sprint.
    Cancel {
        sprint_id: String,
    },

    /// Restart a sprint per its persisted state (spec §4.9).
    Restart {
        sprint_id: String,
    },

    /// Mark a sprint completed.
    Complete {
        sprint_id: String,
    },

    /// Approve the pending local-merge approval for a remote-less sprint.
    MergeLocal {
        sprint_id: String,
    },

    /// Reset a failed task to `pending` and re-enqueue it.
    RetryTask {
        sprint_id: String,
        task_id: u64,
    },

    /// Print a sprint's per-role log files.
    Logs {
        sprint_id: String,
    },
}
