//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Pylon: a dynamic L4 load balancer and a replicated note store,
/// shipped as one binary with two subcommands.
#[derive(Parser)]
#[command(name = "pylon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the load balancer (configured via the LB_* and
    /// HEALTH_CHECK_* environment variables).
    Balance,
    /// Start a note store replica.
    Notes(NotesArgs),
    /// Print version information.
    Version,
}

/// Arguments for the notes command.
#[derive(Args)]
pub struct NotesArgs {
    /// Path to the JSON configuration file.
    pub config: PathBuf,

    /// Log HTTP requests and responses.
    #[arg(long)]
    pub log_requests: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per line.
    Json,
}
