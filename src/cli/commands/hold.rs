//! Hold command - acquire a lock and keep it

use super::{blocking, display_name};
use crate::cli::args::HoldArgs;
use crate::config::Config;
use crate::error::{CacheLockError, CacheLockResult};
use crate::lock::FileLockManager;
use console::style;
use std::io::{self, Write};
use std::time::Duration;
use tracing::debug;

/// Exit code of `hold --crash-after-begin`
pub const CRASH_EXIT_CODE: i32 = 3;

/// Execute the hold command
pub async fn execute(args: HoldArgs, config: &Config) -> CacheLockResult<()> {
    let manager = FileLockManager::new(config.lock.clone());
    let options = config.lock.options(args.mode.into());
    let target = args.target;
    let crash_after_begin = args.crash_after_begin;

    let mut lock = blocking(move || {
        let name = display_name(&target);
        manager.lock(&target, &options, &name)
    })
    .await?;

    // Machine-readable line other processes wait for
    println!("locked {}", lock.lock_file().display());
    flush_stdout()?;

    if crash_after_begin {
        let lock_file = lock.lock_file().to_path_buf();
        return lock.write_file(|| -> CacheLockResult<()> {
            // The reader may have gone away already
            let mut stdout = io::stdout();
            let _ = writeln!(stdout, "dirty {}", lock_file.display());
            let _ = stdout.flush();
            // Skip all cleanup; the OS drops the lock, the header stays dirty
            std::process::exit(CRASH_EXIT_CODE)
        });
    }

    match args.seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                    debug!("Hold period of {}s elapsed", seconds);
                }
                _ = tokio::signal::ctrl_c() => debug!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| CacheLockError::io("waiting for Ctrl-C", e))?;
        }
    }

    let lock_file = lock.lock_file().to_path_buf();
    blocking(move || lock.close()).await?;
    eprintln!("{} Released {}", style("✓").green(), lock_file.display());
    Ok(())
}

fn flush_stdout() -> CacheLockResult<()> {
    io::stdout()
        .flush()
        .map_err(|e| CacheLockError::io("flushing stdout", e))
}
