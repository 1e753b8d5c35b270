//! Lock coordination
//!
//! [`FileLockManager`] hands out [`FileLock`]s: it locks the information
//! region of a cache's lock file, retrying while another process holds it,
//! then reads the lock state so the holder knows whether the previous one
//! finished cleanly. Updates through a `FileLock` are bracketed by a dirty
//! and a clean header write, so a holder that dies mid-update is noticed by
//! the next one.

use crate::config::LockSettings;
use crate::error::{CacheLockError, CacheLockResult};
use crate::lock::backoff::ExponentialBackoff;
use crate::lock::options::{LockMode, LockOptions};
use crate::lock::os::{LockOutcome, RangeLock};
use crate::lock::region::LockRegionAccess;
use crate::lock::serializer::ProtocolVersion;
use crate::lock::state::LockState;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

type LockedFiles = Arc<Mutex<HashSet<PathBuf>>>;

/// Hands out cross-process locks on cache lock files
///
/// One manager should be shared by all threads of a process.
#[derive(Debug, Clone)]
pub struct FileLockManager {
    settings: LockSettings,
    info_region_offset: u64,
    locked_files: LockedFiles,
}

impl FileLockManager {
    /// Create a manager whose lock files carry no target region
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            info_region_offset: 0,
            locked_files: Arc::default(),
        }
    }

    /// Place the information region after `offset` bytes of target data
    pub fn with_info_region_offset(self, offset: u64) -> Self {
        Self {
            info_region_offset: offset,
            ..self
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Lock `target` in the mode requested by `options`
    ///
    /// Waits up to the configured timeout while another process holds a
    /// conflicting lock. Fails immediately if this process already holds it.
    pub fn lock(
        &self,
        target: &Path,
        options: &LockOptions,
        display_name: &str,
    ) -> CacheLockResult<FileLock> {
        let mode = options.mode();
        if !mode.is_supported() {
            return Err(CacheLockError::UnsupportedLockMode(mode));
        }

        let lock_file = options.lock_file_for(target);
        let access = LockRegionAccess::new(options.protocol_version(), self.info_region_offset)?;
        let mut file = open_lock_file(&lock_file)?;

        let registration = Registration::new(&self.locked_files, &lock_file, display_name)?;

        debug!("Waiting to acquire {} lock on {}", mode, display_name);
        let shared = mode == LockMode::Shared;
        let region_lock = self.acquire(&access, &mut file, shared, display_name, &lock_file)?;

        // Dropping `region_lock` on error releases the OS lock again
        let (header_version, state) = if shared {
            let info = access.read_lock_info(&mut file)?;
            (info.version, info.state)
        } else {
            let state = access.ensure_lock_state(&mut file)?;
            let owned = state.with_owner(process::id());
            if owned != state {
                access.write_lock_info(&mut file, &owned)?;
            }
            (Some(access.version()), owned)
        };

        if state.is_in_initial_state() {
            debug!("No previous holder completed an update of {}", display_name);
        } else if state.is_dirty() {
            warn!(
                "{} was not unlocked cleanly, its contents may be inconsistent",
                display_name
            );
        }
        debug!("Lock acquired on {}", display_name);

        Ok(FileLock {
            lock_file,
            display_name: display_name.to_string(),
            mode,
            access,
            header_version,
            state,
            file,
            region_lock: Some(region_lock),
            _registration: registration,
        })
    }

    /// Run `action` while holding a lock on `target`
    ///
    /// The lock is released however `action` exits.
    pub fn with_lock<T, F>(
        &self,
        target: &Path,
        options: &LockOptions,
        display_name: &str,
        action: F,
    ) -> CacheLockResult<T>
    where
        F: FnOnce(&mut FileLock) -> CacheLockResult<T>,
    {
        let mut lock = self.lock(target, options, display_name)?;
        let result = action(&mut lock);
        let released = lock.close();
        let value = result?;
        released?;
        Ok(value)
    }

    fn acquire(
        &self,
        access: &LockRegionAccess,
        file: &mut File,
        shared: bool,
        display_name: &str,
        lock_file: &Path,
    ) -> CacheLockResult<RangeLock> {
        let mut backoff = ExponentialBackoff::new(
            self.settings.timeout(),
            self.settings.backoff_slot(),
            self.settings.backoff_max(),
        );

        loop {
            match access.try_lock(file, shared)? {
                LockOutcome::Acquired(lock) => return Ok(lock),
                LockOutcome::HeldByThisProcess => {
                    return Err(CacheLockError::ReentrantLock {
                        display_name: display_name.to_string(),
                        lock_file: lock_file.to_path_buf(),
                    });
                }
                LockOutcome::HeldByOtherProcess => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            "{} is locked by another process, retrying in {:?}",
                            display_name, delay
                        );
                        thread::sleep(delay);
                    }
                    None => {
                        return Err(CacheLockError::LockTimeout {
                            display_name: display_name.to_string(),
                            lock_file: lock_file.to_path_buf(),
                            owner_pid: read_owner(access, file),
                            our_pid: process::id(),
                        });
                    }
                },
            }
        }
    }
}

/// Owner recorded by the current holder
///
/// Record locks are advisory, so the header can be read while another
/// process holds the region. A header caught mid-write is reported as
/// unknown.
fn read_owner(access: &LockRegionAccess, file: &mut File) -> Option<u32> {
    match access.read_lock_info(file) {
        Ok(info) => info.state.owner_pid(),
        Err(e) => {
            debug!("Could not read lock owner: {}", e);
            None
        }
    }
}

fn open_lock_file(lock_file: &Path) -> CacheLockResult<File> {
    if let Some(parent) = lock_file.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CacheLockError::io(format!("creating lock directory {}", parent.display()), e)
        })?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_file)
        .map_err(|e| CacheLockError::io(format!("opening lock file {}", lock_file.display()), e))
}

/// Marks a lock file as locked through this manager until dropped
#[derive(Debug)]
struct Registration {
    locked_files: LockedFiles,
    path: PathBuf,
}

impl Registration {
    fn new(locked_files: &LockedFiles, lock_file: &Path, display_name: &str) -> CacheLockResult<Self> {
        let path = lock_file.canonicalize().map_err(|e| {
            CacheLockError::io(format!("resolving lock file {}", lock_file.display()), e)
        })?;

        let mut locked = locked_files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !locked.insert(path.clone()) {
            return Err(CacheLockError::ReentrantLock {
                display_name: display_name.to_string(),
                lock_file: lock_file.to_path_buf(),
            });
        }

        Ok(Self {
            locked_files: Arc::clone(locked_files),
            path,
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.locked_files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}

/// A held lock on a cache
///
/// Give it up with [`close`](Self::close); dropping it releases the lock as
/// well but can only log failures.
#[derive(Debug)]
pub struct FileLock {
    lock_file: PathBuf,
    display_name: String,
    mode: LockMode,
    access: LockRegionAccess,
    header_version: Option<ProtocolVersion>,
    state: LockState,
    file: File,
    region_lock: Option<RangeLock>,
    _registration: Registration,
}

impl FileLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Version of the header on disk; `None` while no holder has written one
    pub fn header_version(&self) -> Option<ProtocolVersion> {
        self.header_version
    }

    /// Lock state as last read or written by this holder
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Whether the previous holder completed its last update
    pub fn unlocked_cleanly(&self) -> bool {
        !self.state.is_dirty()
    }

    /// Read the protected content; fails if it may be inconsistent
    pub fn read_file<T, F>(&self, action: F) -> CacheLockResult<T>
    where
        F: FnOnce() -> CacheLockResult<T>,
    {
        self.assert_integral()?;
        action()
    }

    /// Modify consistent content in place
    pub fn update_file<T, F>(&mut self, action: F) -> CacheLockResult<T>
    where
        F: FnOnce() -> CacheLockResult<T>,
    {
        self.assert_integral()?;
        self.write_action(action)
    }

    /// Replace the content regardless of its current consistency
    pub fn write_file<T, F>(&mut self, action: F) -> CacheLockResult<T>
    where
        F: FnOnce() -> CacheLockResult<T>,
    {
        self.write_action(action)
    }

    /// Remove the information region entirely, resetting the lock file
    pub fn clear(&mut self) -> CacheLockResult<()> {
        self.assert_exclusive()?;
        self.access.clear_lock_info(&mut self.file)?;
        let info = self.access.read_lock_info(&mut self.file)?;
        self.header_version = info.version;
        self.state = info.state;
        info!("Cleared lock state of {}", self.display_name);
        Ok(())
    }

    /// Release the lock
    pub fn close(mut self) -> CacheLockResult<()> {
        self.release()
    }

    fn write_action<T, F>(&mut self, action: F) -> CacheLockResult<T>
    where
        F: FnOnce() -> CacheLockResult<T>,
    {
        self.assert_exclusive()?;

        let dirty = self.state.before_update();
        self.access.write_lock_info(&mut self.file, &dirty)?;
        self.header_version = Some(self.access.version());
        self.state = dirty;

        // A failed action leaves the dirty header for the next holder
        let value = action()?;

        let clean = self.state.complete_update();
        self.access.write_lock_info(&mut self.file, &clean)?;
        self.state = clean;
        Ok(value)
    }

    fn assert_exclusive(&self) -> CacheLockResult<()> {
        if self.mode != LockMode::Exclusive {
            return Err(CacheLockError::InsufficientLockMode(self.mode));
        }
        Ok(())
    }

    fn assert_integral(&self) -> CacheLockResult<()> {
        if self.state.is_dirty() {
            return Err(CacheLockError::FileIntegrityViolation(
                self.lock_file.clone(),
            ));
        }
        Ok(())
    }

    fn release(&mut self) -> CacheLockResult<()> {
        if let Some(lock) = self.region_lock.take() {
            debug!("Releasing lock on {}", self.display_name);
            lock.release().map_err(|e| {
                CacheLockError::io(format!("releasing lock on {}", self.display_name), e)
            })?;
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
    }
}
