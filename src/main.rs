//! cachelock - cache lock file inspector
//!
//! CLI entry point that dispatches to subcommands.

use cachelock::cli::{Cli, Commands};
use cachelock::config::{ConfigFile, LockOverrides};
use cachelock::error::CacheLockResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheLockResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("cachelock=warn"),
        1 => EnvFilter::new("cachelock=info"),
        _ => EnvFilter::new("cachelock=debug"),
    };

    // stdout carries command output other processes parse
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config_file = ConfigFile::locate(cli.config);
    let mut config = config_file.read().await?;
    config.lock.apply(LockOverrides {
        cross_version: cli.cross_version,
        lock_dir: cli.lock_dir,
        timeout_ms: cli.timeout_ms,
    });
    debug!("Lock settings: {:?}", config.lock);

    match cli.command {
        Commands::Inspect(args) => cachelock::cli::commands::inspect(args, &config).await,
        Commands::Hold(args) => cachelock::cli::commands::hold(args, &config).await,
        Commands::Reset(args) => cachelock::cli::commands::reset(args, &config).await,
        Commands::Config(args) => {
            cachelock::cli::commands::config(args, &config, &config_file).await
        }
    }
}
