//! Thin command surface over the runtime: `status`, `trigger`, `launch`,
//! `reset`. Grounded on the teacher's `tokio::select!`-driven `main`, with
//! subcommand parsing added via `clap`'s derive API.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "maf", about = "Multi-agent orchestration runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print store statistics and the task health report.
    Status,
    /// Record a new `New`-status feature in the store. No event bus is
    /// running for a bare `trigger` invocation, so the feature is not
    /// dispatched until the next `launch`, which scans the store for
    /// `New` features and publishes `FeatureCreated` for each.
    Trigger {
        description: String,
    },
    /// Start the runtime: event bus, store, orchestrator, enabled agents.
    Launch {
        #[arg(long, value_delimiter = ',')]
        agents: Option<Vec<String>>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Stop any running runtime and delete the persisted state.
    Reset,
}

/// Process exit codes, per the CLI's boundary contract.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 1;
    pub const RUNTIME_ERROR: i32 = 2;
}
