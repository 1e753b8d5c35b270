//! Lock request configuration

use crate::lock::serializer::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Requested lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMode {
    /// Concurrent readers
    Shared,
    /// Sole holder, may mutate the target
    Exclusive,
    /// Lock lazily when contended; decided by higher layers
    OnDemand,
    /// No locking at all
    None,
}

impl LockMode {
    /// Whether the coordinator can take an OS lock in this mode
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Shared | Self::Exclusive)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
            Self::OnDemand => "on-demand",
            Self::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Which file is locked on behalf of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockTarget {
    /// `<dir>/<dir-name>.lock`, or `<parent>/<file-name>.lock` for a file
    #[default]
    DefaultTarget,
    /// Legacy layout: `<dir>/cache.properties.lock`
    CachePropertiesFile,
}

/// Immutable lock configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    mode: LockMode,
    cross_version: bool,
    lock_dir: Option<PathBuf>,
    target: LockTarget,
}

impl LockOptions {
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            cross_version: false,
            lock_dir: None,
            target: LockTarget::DefaultTarget,
        }
    }

    pub fn with_cross_version(self, cross_version: bool) -> Self {
        Self {
            cross_version,
            ..self
        }
    }

    pub fn with_lock_dir(self, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: Some(lock_dir.into()),
            ..self
        }
    }

    pub fn with_target(self, target: LockTarget) -> Self {
        Self { target, ..self }
    }

    /// Same options with a different mode
    pub fn copy_with_mode(&self, mode: LockMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_cross_version(&self) -> bool {
        self.cross_version
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    pub fn target(&self) -> LockTarget {
        self.target
    }

    /// Protocol version headers are read and written with
    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::for_cross_version(self.cross_version)
    }

    /// Lock file path for `target`
    ///
    /// `target` is the cache directory (or file) being protected; it does
    /// not need to exist yet, in which case it is treated as a directory.
    pub fn lock_file_for(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());

        let (dir, file_name) = match self.target {
            LockTarget::CachePropertiesFile => {
                (target.to_path_buf(), "cache.properties.lock".to_string())
            }
            LockTarget::DefaultTarget if target.is_file() => (
                target
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                format!("{}.lock", name),
            ),
            LockTarget::DefaultTarget => (target.to_path_buf(), format!("{}.lock", name)),
        };

        self.lock_dir.as_deref().unwrap_or(&dir).join(file_name)
    }
}
