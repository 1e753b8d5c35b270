//! Error types for cachelock
//!
//! All modules use `CacheLockResult<T>` as their return type.

use crate::lock::options::LockMode;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cachelock operations
pub type CacheLockResult<T> = Result<T, CacheLockError>;

/// All errors that can occur in cachelock
#[derive(Error, Debug)]
pub enum CacheLockError {
    // Protocol errors
    #[error("Unknown lock file protocol version {0}. The lock file was written by an incompatible tool version.")]
    UnknownProtocolVersion(u8),

    #[error("Unexpected lock file protocol version: expected {expected}, found {found}")]
    ProtocolMismatch { expected: u8, found: u8 },

    #[error("Cannot encode a version {found} lock state with the version {expected} serializer")]
    StateVersionMismatch { expected: u8, found: u8 },

    #[error("Information region offset {0} does not leave room for the information region")]
    InvalidRegionOffset(u64),

    #[error("This lock state protocol does not support detecting changes by other processes")]
    UnsupportedCapability,

    // Acquisition errors
    #[error(
        "Timeout waiting to lock {display_name}. It is currently in use by another process.\nOwner PID: {owner}\nOur PID: {our_pid}\nLock file: {lock_file}",
        owner = pid_or_unknown(.owner_pid)
    )]
    LockTimeout {
        display_name: String,
        lock_file: PathBuf,
        /// Last exclusive holder recorded in the header, if readable
        owner_pid: Option<u32>,
        our_pid: u32,
    },

    #[error("Cannot lock {display_name} as it has already been locked by this process. Lock file: {lock_file}")]
    ReentrantLock {
        display_name: String,
        lock_file: PathBuf,
    },

    #[error("No {0} mode lock implementation available")]
    UnsupportedLockMode(LockMode),

    #[error("An exclusive lock is required for this operation, but {0} is held")]
    InsufficientLockMode(LockMode),

    #[error("The file '{0}' was not unlocked cleanly")]
    FileIntegrityViolation(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn pid_or_unknown(pid: &Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}

impl CacheLockError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnknownProtocolVersion(_) | Self::ProtocolMismatch { .. } => {
                Some("Use --cross-version when older tool versions share this cache")
            }
            Self::LockTimeout { .. } => Some("Wait for the other process to finish, then retry"),
            Self::ReentrantLock { .. } => {
                Some("Release the existing lock before acquiring it again")
            }
            Self::FileIntegrityViolation(_) => {
                Some("Rebuild the cache, or run: cachelock reset <target>")
            }
            _ => None,
        }
    }
}
