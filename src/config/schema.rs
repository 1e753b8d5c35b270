//! Configuration schema for cachelock
//!
//! Configuration is stored at `~/.config/cachelock/config.toml`

use crate::lock::options::{LockOptions, LockMode, LockTarget};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lock acquisition settings
    pub lock: LockSettings,
}

/// Lock acquisition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Give up waiting for a lock held by another process after this long
    pub timeout_ms: u64,

    /// First retry delay; doubled on every further attempt
    pub backoff_slot_ms: u64,

    /// Upper bound for a single retry delay
    pub backoff_max_ms: u64,

    /// Write headers other tool versions can read
    pub cross_version: bool,

    /// Keep lock files here instead of next to the cache
    pub lock_dir: Option<PathBuf>,

    /// Which file is locked for a cache
    pub target: LockTarget,
}

/// Settings given on the command line, applied over the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockOverrides {
    pub cross_version: bool,
    pub lock_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            backoff_slot_ms: 25,
            backoff_max_ms: 1_000,
            cross_version: false,
            lock_dir: None,
            target: LockTarget::DefaultTarget,
        }
    }
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_slot(&self) -> Duration {
        Duration::from_millis(self.backoff_slot_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Reject settings the retry loop cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_slot_ms == 0 {
            return Err("backoff_slot_ms must be greater than zero".to_string());
        }
        if self.backoff_max_ms < self.backoff_slot_ms {
            return Err(format!(
                "backoff_max_ms ({}) must not be below backoff_slot_ms ({})",
                self.backoff_max_ms, self.backoff_slot_ms
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the file settings
    pub fn apply(&mut self, overrides: LockOverrides) {
        if overrides.cross_version {
            self.cross_version = true;
        }
        if let Some(dir) = overrides.lock_dir {
            self.lock_dir = Some(dir);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
    }

    /// Lock options in `mode` reflecting these settings
    pub fn options(&self, mode: LockMode) -> LockOptions {
        let options = LockOptions::new(mode)
            .with_cross_version(self.cross_version)
            .with_target(self.target);
        match &self.lock_dir {
            Some(dir) => options.with_lock_dir(dir),
            None => options,
        }
    }
}
