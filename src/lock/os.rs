//! OS byte-range locks over an open lock file
//!
//! Record locks are granted per process (or per open file description on
//! Linux), so the kernel either silently merges a second request from this
//! process or reports it exactly like a foreign holder. Neither tells us
//! that *we* already hold the range. Every range this process locks is
//! therefore recorded in a process-wide table keyed by file identity, and
//! the table is consulted before asking the kernel.
//!
//! On Linux, open file description locks (`F_OFD_SETLK`) are used. Elsewhere
//! classic `F_SETLK` record locks are used, which the kernel drops as soon
//! as *any* descriptor of the file is closed by this process: keep at most
//! one lock per file there.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::sync::{LazyLock, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Ranges locked by this process, per file
static HELD_RANGES: LazyLock<Mutex<HashMap<FileKey, Vec<ByteRange>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn held_ranges() -> MutexGuard<'static, HashMap<FileKey, Vec<ByteRange>>> {
    // The table stays consistent even if a holder panicked mid-update
    HELD_RANGES.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identity of a file independent of the path or handle used to open it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FileKey {
    dev: u64,
    ino: u64,
}

impl FileKey {
    #[cfg(unix)]
    fn of(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_file: &File) -> io::Result<Self> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

/// Half-open byte range `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Result of one non-blocking lock attempt
#[derive(Debug)]
pub enum LockOutcome {
    /// The range is now locked; release the handle to unlock it
    Acquired(RangeLock),
    /// Another process holds a conflicting lock
    HeldByOtherProcess,
    /// This process already holds an overlapping lock
    HeldByThisProcess,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// An acquired byte-range lock
///
/// The lock is given up by [`release`](Self::release), or when the value is
/// dropped.
#[derive(Debug)]
pub struct RangeLock {
    file: File,
    key: FileKey,
    range: ByteRange,
    shared: bool,
    released: bool,
}

impl RangeLock {
    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Unlock the range, reporting failures to the caller
    pub fn release(mut self) -> io::Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut held = held_ranges();
        let result = sys::set_lock(&self.file, self.range, sys::LockKind::Unlock).map(|_| ());
        if let Some(ranges) = held.get_mut(&self.key) {
            if let Some(index) = ranges.iter().position(|r| *r == self.range) {
                ranges.swap_remove(index);
            }
            if ranges.is_empty() {
                held.remove(&self.key);
            }
        }
        debug!(
            "Released byte-range lock [{}, {})",
            self.range.start,
            self.range.end()
        );
        result
    }
}

impl Drop for RangeLock {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!("Failed to release byte-range lock: {}", e);
        }
    }
}

/// Try to lock `range` of `file` without blocking
pub fn try_lock_range(file: &File, range: ByteRange, shared: bool) -> io::Result<LockOutcome> {
    let key = FileKey::of(file)?;

    // Held across the kernel call so two threads cannot both pass the check
    let mut held = held_ranges();
    if held
        .get(&key)
        .is_some_and(|ranges| ranges.iter().any(|r| r.overlaps(&range)))
    {
        return Ok(LockOutcome::HeldByThisProcess);
    }

    let handle = file.try_clone()?;
    let kind = if shared {
        sys::LockKind::Shared
    } else {
        sys::LockKind::Exclusive
    };
    if !sys::set_lock(&handle, range, kind)? {
        return Ok(LockOutcome::HeldByOtherProcess);
    }

    held.entry(key).or_default().push(range);
    Ok(LockOutcome::Acquired(RangeLock {
        file: handle,
        key,
        range,
        shared,
        released: false,
    }))
}

#[cfg(unix)]
mod sys {
    use super::ByteRange;
    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg};
    use std::fs::File;
    use std::io;
    use std::os::fd::AsFd;

    #[derive(Debug, Clone, Copy)]
    pub(super) enum LockKind {
        Shared,
        Exclusive,
        Unlock,
    }

    /// Returns `Ok(false)` when a conflicting lock is held elsewhere
    pub(super) fn set_lock(file: &File, range: ByteRange, kind: LockKind) -> io::Result<bool> {
        let l_type = match kind {
            LockKind::Shared => libc::F_RDLCK,
            LockKind::Exclusive => libc::F_WRLCK,
            LockKind::Unlock => libc::F_UNLCK,
        };

        // SAFETY: flock is plain old data and all-zero is a valid value.
        // OFD locks additionally require l_pid to be zero.
        let mut request: libc::flock = unsafe { std::mem::zeroed() };
        request.l_type = l_type as libc::c_short;
        request.l_whence = libc::SEEK_SET as libc::c_short;
        request.l_start = to_off_t(range.start)?;
        request.l_len = to_off_t(range.len)?;

        #[cfg(target_os = "linux")]
        let arg = FcntlArg::F_OFD_SETLK(&request);
        #[cfg(not(target_os = "linux"))]
        let arg = FcntlArg::F_SETLK(&request);

        match fcntl(file.as_fd(), arg) {
            Ok(_) => Ok(true),
            Err(Errno::EAGAIN | Errno::EACCES) => Ok(false),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    fn to_off_t(value: u64) -> io::Result<libc::off_t> {
        libc::off_t::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("lock offset {} out of range", value),
            )
        })
    }
}

#[cfg(not(unix))]
mod sys {
    use super::ByteRange;
    use std::fs::File;
    use std::io;

    #[derive(Debug, Clone, Copy)]
    pub(super) enum LockKind {
        Shared,
        Exclusive,
        Unlock,
    }

    pub(super) fn set_lock(_file: &File, _range: ByteRange, _kind: LockKind) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "byte-range locking is only supported on unix platforms",
        ))
    }
}
