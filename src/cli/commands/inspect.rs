//! Inspect command - show the lock state of a cache

use super::{blocking, display_name};
use crate::cli::args::{InspectArgs, OutputFormat};
use crate::config::Config;
use crate::error::CacheLockResult;
use crate::lock::{FileLock, FileLockManager, LockMode, LockState};
use console::style;
use serde::Serialize;
use std::path::PathBuf;

/// Lock file summary printed by `inspect`
#[derive(Debug, Serialize)]
struct LockReport {
    lock_file: PathBuf,
    header_written: bool,
    /// Tag of the header on disk; absent until a holder writes one
    protocol_version: Option<u8>,
    mode: LockMode,
    initial: bool,
    dirty: bool,
    can_detect_changes: bool,
    marker: Option<String>,
    owner_pid: Option<u32>,
}

impl LockReport {
    fn from_lock(lock: &FileLock) -> Self {
        let state = lock.state();
        let header_version = lock.header_version();
        let marker = match state {
            LockState::Marker { marker, .. } if !marker.is_nil() => Some(marker.to_string()),
            _ => None,
        };

        Self {
            lock_file: lock.lock_file().to_path_buf(),
            header_written: header_version.is_some(),
            protocol_version: header_version.map(|version| version.tag()),
            mode: lock.mode(),
            initial: state.is_in_initial_state(),
            dirty: state.is_dirty(),
            can_detect_changes: state.can_detect_changes(),
            marker,
            owner_pid: state.owner_pid(),
        }
    }
}

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> CacheLockResult<()> {
    let manager = FileLockManager::new(config.lock.clone());
    let options = config.lock.options(LockMode::Shared);
    let target = args.target;

    let report = blocking(move || {
        let name = display_name(&target);
        manager.with_lock(&target, &options, &name, |lock| {
            Ok(LockReport::from_lock(lock))
        })
    })
    .await?;

    match args.format {
        OutputFormat::Table => print_report_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

fn print_report_table(report: &LockReport) {
    let state = if report.initial {
        style("initial").dim().to_string()
    } else if report.dirty {
        style("dirty").yellow().to_string()
    } else {
        style("clean").green().to_string()
    };

    println!("{:<18} {}", "Lock file:", report.lock_file.display());
    let version = report
        .protocol_version
        .map_or_else(|| "-".to_string(), |tag| tag.to_string());
    println!("{:<18} {}", "Protocol version:", version);
    println!("{:<18} {}", "State:", state);
    println!(
        "{:<18} {}",
        "Change detection:",
        if report.can_detect_changes { "yes" } else { "no" }
    );
    if let Some(marker) = &report.marker {
        println!("{:<18} {}", "Update marker:", marker);
    }
    if let Some(pid) = report.owner_pid {
        println!("{:<18} {}", "Last owner PID:", pid);
    }
    if !report.header_written {
        println!();
        println!("No holder has written a header yet.");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::LockSettings;
    use tempfile::TempDir;

    fn report(manager: &FileLockManager, cache: &std::path::Path) -> LockReport {
        let options = manager.settings().options(LockMode::Shared);
        manager
            .with_lock(cache, &options, "test cache", |lock| {
                Ok(LockReport::from_lock(lock))
            })
            .unwrap()
    }

    #[test]
    fn fresh_cache_reports_no_version() {
        let temp = TempDir::new().unwrap();
        let manager = FileLockManager::new(LockSettings::default());

        let fresh = report(&manager, temp.path());
        assert!(!fresh.header_written);
        assert_eq!(fresh.protocol_version, None);
        assert!(fresh.initial);
        assert_eq!(fresh.owner_pid, None);

        let options = manager.settings().options(LockMode::Exclusive);
        manager
            .with_lock(temp.path(), &options, "test cache", |lock| {
                lock.write_file(|| Ok(()))
            })
            .unwrap();

        let written = report(&manager, temp.path());
        assert!(written.header_written);
        assert_eq!(written.protocol_version, Some(2));
        assert!(!written.initial);
        assert!(written.marker.is_some());
        assert_eq!(written.owner_pid, Some(std::process::id()));
    }
}
