//! CLI command implementations.

pub mod config;
pub mod explain;

use clap::{Args, Subcommand};

/// Arguments for the explain command.
#[derive(Args)]
pub struct ExplainArgs {
    /// Only run these phases (e.g. `request`, `prerender-ppr`).
    #[arg(short, long)]
    pub phase: Vec<String>,

    /// Run these accesses instead of the scenario's list.
    #[arg(short, long)]
    pub access: Vec<String>,

    /// How long to wait on a handle before reporting it pending, in milliseconds.
    #[arg(long, default_value = "20")]
    pub window_ms: u64,

    /// Abort each dry-run render signal after the accesses ran.
    #[arg(long)]
    pub abort: bool,
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved scenario.
    Show,
    /// Initialize a new scenario file.
    Init {
        /// Route path for the scenario.
        #[arg(long, default_value = "/")]
        route: String,

        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the scenario file.
    Validate,
}
