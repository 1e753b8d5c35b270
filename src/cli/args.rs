//! CLI argument definitions using clap derive

use crate::lock::LockMode;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// cachelock - inspect and exercise cache lock files
///
/// Takes the same cross-process locks as the tools sharing a cache, so
/// lock files can be examined, held, or reset safely.
#[derive(Parser, Debug)]
#[command(name = "cachelock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CACHELOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Read and write headers older tool versions understand
    #[arg(long, global = true)]
    pub cross_version: bool,

    /// Directory holding lock files, instead of the cache itself
    #[arg(long, global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Give up waiting for a lock after this many milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the lock state of a cache
    Inspect(InspectArgs),

    /// Acquire a lock and hold it
    Hold(HoldArgs),

    /// Discard the lock state of a cache
    Reset(ResetArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// Lock mode accepted on the command line
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ModeArg {
    Shared,
    #[default]
    Exclusive,
}

impl From<ModeArg> for LockMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Shared => LockMode::Shared,
            ModeArg::Exclusive => LockMode::Exclusive,
        }
    }
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Cache directory or file guarded by the lock
    pub target: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the hold command
#[derive(Parser, Debug)]
pub struct HoldArgs {
    /// Cache directory or file guarded by the lock
    pub target: PathBuf,

    /// Lock mode
    #[arg(short, long, default_value = "exclusive")]
    pub mode: ModeArg,

    /// Release after this many seconds (default: wait for Ctrl-C)
    #[arg(short, long)]
    pub seconds: Option<u64>,

    /// Mark the cache dirty, then exit without completing the update
    #[arg(long, conflicts_with = "seconds")]
    pub crash_after_begin: bool,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Cache directory or file guarded by the lock
    pub target: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
