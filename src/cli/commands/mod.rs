//! CLI command implementations

pub mod config;
pub mod hold;
pub mod inspect;
pub mod reset;

pub use config::execute as config;
pub use hold::execute as hold;
pub use inspect::execute as inspect;
pub use reset::execute as reset;

use crate::error::{CacheLockError, CacheLockResult};
use std::path::Path;

/// Run blocking lock work off the async runtime
async fn blocking<T, F>(work: F) -> CacheLockResult<T>
where
    F: FnOnce() -> CacheLockResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheLockError::Internal(format!("lock task failed: {}", e)))?
}

fn display_name(target: &Path) -> String {
    format!("cache {}", target.display())
}
