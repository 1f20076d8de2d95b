//! CLI argument definitions
//!
//! All Clap derive structs for `roomkeeper` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

// ============================================================================
// Root CLI
// ============================================================================

/// Per-room session engine: phase cycling, coordination and repair.
#[derive(Parser, Debug)]
#[command(name = "roomkeeper", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "ROOMKEEPER_COLOR")]
    pub color: ColorChoice,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive rooms until interrupted.
    Run(RunArgs),

    /// Show the state of one room or every stored room.
    Status(StatusArgs),

    /// Repair stuck rooms.
    Repair(RepairArgs),

    /// Remove a room's running break without touching its phase.
    ForceClear(ForceClearArgs),

    /// Validate configuration files.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Options shared by every command that opens a store.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Path to the JSON room store (created if missing).
    #[arg(short, long, env = "ROOMKEEPER_STORE")]
    pub store: PathBuf,

    /// Path to the YAML engine configuration.
    #[arg(short, long, env = "ROOMKEEPER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Store and configuration.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Room to drive; repeat for several rooms.
    #[arg(short, long = "room", required = true)]
    pub rooms: Vec<String>,

    /// Append JSONL events to this file instead of stderr.
    #[arg(long, env = "ROOMKEEPER_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "ROOMKEEPER_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Store and configuration.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Room to inspect; every stored room when omitted.
    #[arg(short, long)]
    pub room: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `repair`.
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("target").required(true).multiple(false))]
pub struct RepairArgs {
    /// Store and configuration.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Room to repair.
    #[arg(short, long, group = "target")]
    pub room: Option<String>,

    /// Repair every stored room.
    #[arg(long, group = "target")]
    pub all: bool,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `force-clear`.
#[derive(Args, Debug)]
pub struct ForceClearArgs {
    /// Store and configuration.
    #[command(flatten)]
    pub store: StoreArgs,

    /// Room whose break is removed.
    #[arg(short, long)]
    pub room: String,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================
