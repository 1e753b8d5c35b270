//! Configuration for cachelock
//!
//! Lock settings are layered: built-in defaults, then the TOML file, then
//! command-line overrides. The file is validated as a whole, so a setting
//! that could never acquire a lock is rejected at startup rather than on
//! the first contended lock.

pub mod schema;

pub use schema::{Config, LockOverrides, LockSettings};

use crate::error::{CacheLockError, CacheLockResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// The configuration file, which may not exist yet
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    /// Use `explicit` when given, else the per-user location
    pub fn locate(explicit: Option<PathBuf>) -> Self {
        Self {
            path: explicit.unwrap_or_else(Self::default_path),
        }
    }

    /// `<config dir>/cachelock/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cachelock")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the file; a missing file means defaults
    pub async fn read(&self) -> CacheLockResult<Config> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => self.parse(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.path.display());
                Ok(Config::default())
            }
            Err(e) => Err(CacheLockError::io(
                format!("reading config from {}", self.path.display()),
                e,
            )),
        }
    }

    fn parse(&self, content: &str) -> CacheLockResult<Config> {
        let config: Config = toml::from_str(content).map_err(|e| self.invalid(e.to_string()))?;
        config.lock.validate().map_err(|reason| self.invalid(reason))?;
        Ok(config)
    }

    fn invalid(&self, reason: String) -> CacheLockError {
        CacheLockError::ConfigInvalid {
            path: self.path.clone(),
            reason,
        }
    }

    /// Write `config`; an existing file is only replaced when `force` is set
    ///
    /// Returns whether the file was written.
    pub async fn write(&self, config: &Config, force: bool) -> CacheLockResult<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheLockError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = match options.open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Keeping existing config at {}", self.path.display());
                return Ok(false);
            }
            Err(e) => {
                return Err(CacheLockError::io(
                    format!("creating config {}", self.path.display()),
                    e,
                ))
            }
        };

        let content = toml::to_string_pretty(config)?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| CacheLockError::io(format!("writing config {}", self.path.display()), e))?;
        file.flush()
            .await
            .map_err(|e| CacheLockError::io(format!("writing config {}", self.path.display()), e))?;

        info!("Configuration written to {}", self.path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_in(temp: &TempDir, name: &str) -> ConfigFile {
        ConfigFile::locate(Some(temp.path().join(name)))
    }

    #[test]
    fn locate_prefers_explicit_path() {
        let file = ConfigFile::locate(Some(PathBuf::from("/etc/cachelock.toml")));
        assert_eq!(file.path(), Path::new("/etc/cachelock.toml"));
        assert!(ConfigFile::locate(None).path().ends_with("cachelock/config.toml"));
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        let temp = TempDir::new().unwrap();
        let config = file_in(&temp, "absent.toml").read().await.unwrap();
        assert_eq!(config.lock, LockSettings::default());
    }

    #[tokio::test]
    async fn written_settings_read_back() {
        let temp = TempDir::new().unwrap();
        let file = file_in(&temp, "nested/config.toml");

        let mut config = Config::default();
        config.lock.timeout_ms = 1_500;
        config.lock.cross_version = true;

        assert!(file.write(&config, false).await.unwrap());
        assert_eq!(file.read().await.unwrap().lock, config.lock);
    }

    #[tokio::test]
    async fn write_keeps_existing_file_unless_forced() {
        let temp = TempDir::new().unwrap();
        let file = file_in(&temp, "config.toml");
        tokio::fs::write(file.path(), "[lock]\ntimeout_ms = 10\n")
            .await
            .unwrap();

        assert!(!file.write(&Config::default(), false).await.unwrap());
        assert_eq!(file.read().await.unwrap().lock.timeout_ms, 10);

        assert!(file.write(&Config::default(), true).await.unwrap());
        assert_eq!(file.read().await.unwrap().lock.timeout_ms, 60_000);
    }

    #[tokio::test]
    async fn malformed_file_is_invalid() {
        let temp = TempDir::new().unwrap();
        let file = file_in(&temp, "config.toml");
        tokio::fs::write(file.path(), "[lock]\ntimeout_ms = \"soon\"\n")
            .await
            .unwrap();

        let err = file.read().await.unwrap_err();
        assert!(matches!(err, CacheLockError::ConfigInvalid { path, .. } if path == file.path()));
    }

    #[tokio::test]
    async fn unusable_backoff_is_invalid() {
        let temp = TempDir::new().unwrap();
        let file = file_in(&temp, "config.toml");
        tokio::fs::write(file.path(), "[lock]\nbackoff_slot_ms = 0\n")
            .await
            .unwrap();

        let err = file.read().await.unwrap_err();
        match err {
            CacheLockError::ConfigInvalid { reason, .. } => {
                assert!(reason.contains("backoff_slot_ms"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
