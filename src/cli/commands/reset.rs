//! Reset command - discard the lock state of a cache

use super::{blocking, display_name};
use crate::cli::args::ResetArgs;
use crate::config::Config;
use crate::error::CacheLockResult;
use crate::lock::{FileLockManager, LockMode};
use console::style;

/// Execute the reset command
pub async fn execute(args: ResetArgs, config: &Config) -> CacheLockResult<()> {
    let manager = FileLockManager::new(config.lock.clone());
    let options = config.lock.options(LockMode::Exclusive);
    let target = args.target;

    let lock_file = blocking(move || {
        let name = display_name(&target);
        manager.with_lock(&target, &options, &name, |lock| {
            lock.clear()?;
            Ok(lock.lock_file().to_path_buf())
        })
    })
    .await?;

    println!(
        "{} Cleared lock state in {}",
        style("✓").green(),
        style(lock_file.display()).cyan()
    );
    Ok(())
}
