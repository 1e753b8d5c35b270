//! Integration tests for cachelock

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Command isolated from the user's configuration
fn cachelock(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("cachelock");
    cmd.env("CACHELOCK_CONFIG", home.join("config.toml"));
    cmd
}

fn cache_dir(home: &Path) -> PathBuf {
    let dir = home.join("cache");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

mod cli_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        cachelock(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache lock files"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        cachelock(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cachelock"));
    }

    #[test]
    fn config_path_follows_env() {
        let home = TempDir::new().unwrap();
        cachelock(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let home = TempDir::new().unwrap();
        cachelock(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[lock]"))
            .stdout(predicate::str::contains("timeout_ms = 60000"));
    }

    #[test]
    fn config_init_then_refuses_overwrite() {
        let home = TempDir::new().unwrap();
        cachelock(home.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("initialized"));
        assert!(home.path().join("config.toml").exists());

        cachelock(home.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "[lock]\ntimeout_ms = \"soon\"\n").unwrap();
        cachelock(home.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn unusable_backoff_is_rejected() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[lock]\nbackoff_slot_ms = 100\nbackoff_max_ms = 10\n",
        )
        .unwrap();
        cachelock(home.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("backoff_max_ms"));
    }

    #[test]
    fn config_init_force_replaces_file() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "[lock]\ntimeout_ms = 7\n").unwrap();
        cachelock(home.path())
            .args(["config", "init", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("initialized"));
        cachelock(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeout_ms = 60000"));
    }

    #[test]
    fn inspect_fresh_cache() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        cachelock(home.path())
            .arg("inspect")
            .arg(&cache)
            .assert()
            .success()
            .stdout(predicate::str::contains("cache.lock"))
            .stdout(predicate::str::contains("initial"));
    }

    #[test]
    fn inspect_json_fresh_cache_has_no_version() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());

        let output = cachelock(home.path())
            .arg("inspect")
            .arg(&cache)
            .args(["--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert!(report["protocol_version"].is_null());
        assert_eq!(report["header_written"], false);
        assert!(report["owner_pid"].is_null());
    }

    #[test]
    fn inspect_json_after_hold() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());

        cachelock(home.path())
            .arg("hold")
            .arg(&cache)
            .args(["--seconds", "0"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("locked "));

        let output = cachelock(home.path())
            .arg("inspect")
            .arg(&cache)
            .args(["--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["protocol_version"], 2);
        assert_eq!(report["mode"], "shared");
        assert_eq!(report["header_written"], true);
        // An exclusive hold without updates only writes the initial state
        assert_eq!(report["initial"], true);
        assert_eq!(report["can_detect_changes"], true);
    }

    #[test]
    fn reset_clears_header() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        let lock_file = cache.join("cache.lock");

        cachelock(home.path())
            .arg("hold")
            .arg(&cache)
            .args(["--seconds", "0"])
            .assert()
            .success();
        assert!(std::fs::metadata(&lock_file).unwrap().len() > 0);

        cachelock(home.path())
            .arg("reset")
            .arg(&cache)
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared lock state"));
        assert_eq!(std::fs::metadata(&lock_file).unwrap().len(), 0);
    }

    #[test]
    fn lock_dir_relocates_lock_file() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        let locks = home.path().join("locks");

        cachelock(home.path())
            .arg("--lock-dir")
            .arg(&locks)
            .arg("inspect")
            .arg(&cache)
            .assert()
            .success();

        assert!(locks.join("cache.lock").exists());
        assert!(!cache.join("cache.lock").exists());
    }
}

#[cfg(unix)]
mod protocol_tests {
    use super::*;
    use cachelock::config::LockSettings;
    use cachelock::lock::{
        FileLockManager, LockMode, LockOutcome, LockRegionAccess, LockState, ProtocolVersion,
    };
    use cachelock::CacheLockError;
    use predicates::prelude::*;
    use std::fs::OpenOptions;
    use std::io::{BufRead, BufReader};
    use std::process::{Child, Command as StdCommand, Stdio};

    fn settings(timeout_ms: u64) -> LockSettings {
        LockSettings {
            timeout_ms,
            backoff_slot_ms: 5,
            backoff_max_ms: 20,
            ..LockSettings::default()
        }
    }

    /// Start `cachelock hold` and wait until it reports the lock as taken
    fn spawn_holder(home: &Path, cache: &Path, extra: &[&str]) -> (Child, String) {
        let mut child = StdCommand::new(env!("CARGO_BIN_EXE_cachelock"))
            .env("CACHELOCK_CONFIG", home.join("config.toml"))
            .arg("hold")
            .arg(cache)
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let stdout = child.stdout.take().unwrap();
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).unwrap();
        assert!(line.starts_with("locked "), "unexpected output: {line}");
        (child, line)
    }

    #[test]
    fn holder_in_other_process_blocks_acquisition() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        let (mut child, _) = spawn_holder(home.path(), &cache, &["--seconds", "30"]);

        let lock_file = cache.join("cache.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&lock_file)
            .unwrap();
        let access = LockRegionAccess::new(ProtocolVersion::CURRENT, 0).unwrap();
        assert!(matches!(
            access.try_lock(&file, true).unwrap(),
            LockOutcome::HeldByOtherProcess
        ));

        let manager = FileLockManager::new(settings(100));
        let options = manager.settings().options(LockMode::Exclusive);
        let err = manager.lock(&cache, &options, "test cache").unwrap_err();
        match &err {
            CacheLockError::LockTimeout {
                owner_pid, our_pid, ..
            } => {
                assert_eq!(*owner_pid, Some(child.id()));
                assert_eq!(*our_pid, std::process::id());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retryable());
        assert!(err
            .to_string()
            .contains(&format!("Owner PID: {}", child.id())));

        cachelock(home.path())
            .args(["--timeout-ms", "100", "reset"])
            .arg(&cache)
            .assert()
            .failure()
            .stderr(predicate::str::contains(format!("Owner PID: {}", child.id())))
            .stderr(predicate::str::contains("Our PID:"));

        child.kill().unwrap();
        child.wait().unwrap();

        let lock = manager.lock(&cache, &options, "test cache").unwrap();
        assert!(lock.state().is_in_initial_state());
        lock.close().unwrap();
    }

    #[test]
    fn shared_holders_coexist_across_processes() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        let (mut child, _) =
            spawn_holder(home.path(), &cache, &["--mode", "shared", "--seconds", "30"]);

        let manager = FileLockManager::new(settings(100));
        let shared = manager.settings().options(LockMode::Shared);
        let lock = manager.lock(&cache, &shared, "test cache").unwrap();
        lock.close().unwrap();

        let exclusive = manager.settings().options(LockMode::Exclusive);
        let err = manager.lock(&cache, &exclusive, "test cache").unwrap_err();
        assert!(matches!(err, CacheLockError::LockTimeout { .. }));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn crashed_update_is_detected_by_next_holder() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        let manager = FileLockManager::new(settings(5_000));
        let options = manager.settings().options(LockMode::Exclusive);

        let observed: LockState = manager
            .with_lock(&cache, &options, "test cache", |lock| {
                lock.write_file(|| Ok(()))?;
                Ok(lock.state())
            })
            .unwrap();
        assert!(!observed.is_dirty());

        let (mut child, _) = spawn_holder(home.path(), &cache, &["--crash-after-begin"]);
        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(3));

        let mut lock = manager.lock(&cache, &options, "test cache").unwrap();
        assert!(!lock.unlocked_cleanly());
        assert!(lock.state().has_been_updated_since(&observed).unwrap());

        let err = lock.read_file(|| Ok(())).unwrap_err();
        assert!(matches!(err, CacheLockError::FileIntegrityViolation(_)));

        // Rewriting the content repairs the cache
        lock.write_file(|| Ok(())).unwrap();
        assert!(lock.unlocked_cleanly());
        lock.close().unwrap();
    }

    #[test]
    fn cross_version_header_needs_flag() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());

        let manager = FileLockManager::new(LockSettings {
            cross_version: true,
            ..settings(5_000)
        });
        let options = manager.settings().options(LockMode::Exclusive);
        manager
            .with_lock(&cache, &options, "test cache", |lock| lock.write_file(|| Ok(())))
            .unwrap();

        let output = cachelock(home.path())
            .arg("--cross-version")
            .arg("inspect")
            .arg(&cache)
            .args(["--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["protocol_version"], 1);
        assert_eq!(report["can_detect_changes"], false);
        assert_eq!(report["dirty"], false);

        cachelock(home.path())
            .arg("inspect")
            .arg(&cache)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unexpected lock file protocol version"))
            .stderr(predicate::str::contains("--cross-version"));
    }

    #[test]
    fn unknown_protocol_tag_is_fatal() {
        let home = TempDir::new().unwrap();
        let cache = cache_dir(home.path());
        std::fs::write(cache.join("cache.lock"), [0x7f, 0, 0]).unwrap();

        cachelock(home.path())
            .arg("inspect")
            .arg(&cache)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown lock file protocol version 127"));
    }
}
