//! Information region of a lock file
//!
//! ```text
//! [0 .. offset)               target region, owned by the cache engine
//! [offset .. offset+1)        protocol version tag
//! [offset+1 .. offset+1+size) encoded lock state
//! [.. offset+2052)            reserved, usually absent
//! ```
//!
//! The OS lock always covers the full reserved extent, so every tool
//! version locks the same bytes whatever serializer it writes with.

use crate::error::{CacheLockError, CacheLockResult};
use crate::lock::os::{self, ByteRange, LockOutcome};
use crate::lock::serializer::{LockStateSerializer, ProtocolVersion};
use crate::lock::state::LockState;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tracing::debug;

/// Total size of the information region, and width of its OS lock
pub const INFORMATION_REGION_SIZE: u64 = 2052;

/// Random-access handle to a lock file
pub trait LockFileHandle: Read + Write + Seek {
    /// Current length in bytes
    fn length(&self) -> io::Result<u64>;

    /// Shrink or extend the file to exactly `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LockFileHandle for File {
    fn length(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl LockFileHandle for Cursor<Vec<u8>> {
    fn length(&self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length out of range"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// Header read back from the information region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockInfo {
    /// Version found on disk; `None` when no header was written yet
    pub version: Option<ProtocolVersion>,
    pub state: LockState,
}

/// Reads, writes and locks the information region for one protocol version
#[derive(Debug, Clone, Copy)]
pub struct LockRegionAccess {
    version: ProtocolVersion,
    offset: u64,
}

impl LockRegionAccess {
    /// Accessor for a region starting at `offset`
    ///
    /// The offset must leave room for the region's lock extent.
    pub fn new(version: ProtocolVersion, offset: u64) -> CacheLockResult<Self> {
        if offset >= INFORMATION_REGION_SIZE {
            return Err(CacheLockError::InvalidRegionOffset(offset));
        }
        Ok(Self { version, offset })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn serializer(&self) -> &'static dyn LockStateSerializer {
        self.version.serializer()
    }

    /// Bytes locked by [`try_lock`](Self::try_lock)
    pub fn lock_range(&self) -> ByteRange {
        ByteRange::new(self.offset, INFORMATION_REGION_SIZE - self.offset)
    }

    /// Length of the file right after [`write_lock_info`](Self::write_lock_info)
    pub fn written_len(&self) -> u64 {
        self.offset + 1 + self.serializer().size() as u64
    }

    /// Read the header, or the initial state when none exists yet
    pub fn read_lock_info<H: LockFileHandle + ?Sized>(
        &self,
        handle: &mut H,
    ) -> CacheLockResult<LockInfo> {
        let length = handle
            .length()
            .map_err(|e| CacheLockError::io("reading lock file length", e))?;
        if length <= self.offset {
            return Ok(LockInfo {
                version: None,
                state: self.serializer().create_initial_state(),
            });
        }

        handle
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| CacheLockError::io("seeking to information region", e))?;
        let mut tag = [0u8; 1];
        handle
            .read_exact(&mut tag)
            .map_err(|e| CacheLockError::io("reading protocol version", e))?;

        let found = ProtocolVersion::from_tag(tag[0])?;
        if found != self.version {
            return Err(CacheLockError::ProtocolMismatch {
                expected: self.version.tag(),
                found: found.tag(),
            });
        }

        let serializer = found.serializer();
        let mut encoded = vec![0u8; serializer.size()];
        handle
            .read_exact(&mut encoded)
            .map_err(|e| CacheLockError::io("reading lock state", e))?;
        let state = serializer.read(&encoded)?;

        Ok(LockInfo {
            version: Some(found),
            state,
        })
    }

    /// Persist `state`, discarding anything stored past the new header
    pub fn write_lock_info<H: LockFileHandle + ?Sized>(
        &self,
        handle: &mut H,
        state: &LockState,
    ) -> CacheLockResult<()> {
        let encoded = self.serializer().write(state)?;

        let mut header = Vec::with_capacity(1 + encoded.len());
        header.push(self.version.tag());
        header.extend_from_slice(&encoded);

        handle
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| CacheLockError::io("seeking to information region", e))?;
        handle
            .write_all(&header)
            .map_err(|e| CacheLockError::io("writing lock state", e))?;
        handle
            .flush()
            .map_err(|e| CacheLockError::io("flushing lock state", e))?;

        let end = handle
            .stream_position()
            .map_err(|e| CacheLockError::io("reading lock file position", e))?;
        handle
            .truncate(end)
            .map_err(|e| CacheLockError::io("truncating lock file", e))?;

        debug!(
            "Wrote {} lock state (dirty: {})",
            self.version,
            state.is_dirty()
        );
        Ok(())
    }

    /// Remove the information region, keeping the target region intact
    pub fn clear_lock_info<H: LockFileHandle + ?Sized>(&self, handle: &mut H) -> CacheLockResult<()> {
        let length = handle
            .length()
            .map_err(|e| CacheLockError::io("reading lock file length", e))?;
        handle
            .truncate(length.min(self.offset))
            .map_err(|e| CacheLockError::io("truncating lock file", e))?;
        Ok(())
    }

    /// Read the header, writing the initial state first when none exists
    pub fn ensure_lock_state<H: LockFileHandle + ?Sized>(
        &self,
        handle: &mut H,
    ) -> CacheLockResult<LockState> {
        let info = self.read_lock_info(handle)?;
        if info.version.is_none() {
            debug!("Initializing lock state");
            self.write_lock_info(handle, &info.state)?;
        }
        Ok(info.state)
    }

    /// Try to lock the region without blocking
    pub fn try_lock(&self, file: &File, shared: bool) -> CacheLockResult<LockOutcome> {
        os::try_lock_range(file, self.lock_range(), shared)
            .map_err(|e| CacheLockError::io("locking information region", e))
    }
}
