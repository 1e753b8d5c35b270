//! Versioned lock state encodings
//!
//! The first byte of the information region names the encoding of the state
//! that follows it. Every encoding ever shipped stays decodable so that tool
//! versions sharing one cache directory keep understanding each other.
//!
//! | Tag | Encoding | Size | Change detection |
//! |-----|----------|------|------------------|
//! | 1 | `[clean: u8]` | 1 | no |
//! | 2 | `[clean: u8][marker: 16 bytes][owner pid: u32 BE]` | 21 | yes |

use crate::error::{CacheLockError, CacheLockResult};
use crate::lock::state::LockState;
use std::fmt;
use std::io;
use uuid::Uuid;

/// Encodes and decodes lock states for one protocol version
pub trait LockStateSerializer: Send + Sync {
    /// Protocol version written as the leading tag byte
    fn version(&self) -> ProtocolVersion;

    /// Number of bytes the encoded state occupies after the tag
    fn size(&self) -> usize;

    /// State reported before any holder wrote a header
    fn create_initial_state(&self) -> LockState;

    /// Decode a state from the bytes following the tag
    fn read(&self, bytes: &[u8]) -> CacheLockResult<LockState>;

    /// Encode a state, returning exactly `size()` bytes
    fn write(&self, state: &LockState) -> CacheLockResult<Vec<u8>>;
}

/// Known lock state protocol versions, keyed by their tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Dirty flag only; understood by every tool version
    DirtyFlag = 1,
    /// Dirty flag plus update marker
    Marker = 2,
}

impl ProtocolVersion {
    /// Version used unless cross-version compatibility is requested
    pub const CURRENT: Self = Self::Marker;

    /// Most interoperable version
    pub const CROSS_VERSION: Self = Self::DirtyFlag;

    /// Every supported version
    pub const ALL: [Self; 2] = [Self::DirtyFlag, Self::Marker];

    /// Tag byte identifying this version on disk
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a version by tag; unknown tags are never defaulted
    pub fn from_tag(tag: u8) -> CacheLockResult<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.tag() == tag)
            .ok_or(CacheLockError::UnknownProtocolVersion(tag))
    }

    /// Version selected by the cross-version switch
    pub fn for_cross_version(cross_version: bool) -> Self {
        if cross_version {
            Self::CROSS_VERSION
        } else {
            Self::CURRENT
        }
    }

    /// Serializer implementing this version
    pub fn serializer(self) -> &'static dyn LockStateSerializer {
        match self {
            Self::DirtyFlag => &DirtyFlagSerializer,
            Self::Marker => &MarkerSerializer,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirtyFlag => "dirty-flag",
            Self::Marker => "marker",
        };
        write!(f, "{} (v{})", name, self.tag())
    }
}

/// Version 1: a single byte, `1` when clean and `0` when dirty
///
/// Carries no owner information, so decoded states can never report
/// changes made by other processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyFlagSerializer;

impl LockStateSerializer for DirtyFlagSerializer {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::DirtyFlag
    }

    fn size(&self) -> usize {
        1
    }

    fn create_initial_state(&self) -> LockState {
        LockState::DirtyFlag {
            dirty: true,
            initial: true,
        }
    }

    fn read(&self, bytes: &[u8]) -> CacheLockResult<LockState> {
        let bytes = encoded_bytes(bytes, self.size())?;
        Ok(LockState::DirtyFlag {
            dirty: bytes[0] == 0,
            initial: false,
        })
    }

    fn write(&self, state: &LockState) -> CacheLockResult<Vec<u8>> {
        match state {
            LockState::DirtyFlag { dirty, .. } => Ok(vec![u8::from(!dirty)]),
            other => Err(version_mismatch(self.version(), other)),
        }
    }
}

/// Version 2: clean byte, 16-byte update marker, then the owner's pid
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerSerializer;

impl LockStateSerializer for MarkerSerializer {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Marker
    }

    fn size(&self) -> usize {
        21
    }

    fn create_initial_state(&self) -> LockState {
        LockState::Marker {
            dirty: true,
            marker: Uuid::nil(),
            owner_pid: 0,
        }
    }

    fn read(&self, bytes: &[u8]) -> CacheLockResult<LockState> {
        let bytes = encoded_bytes(bytes, self.size())?;
        let mut marker = [0u8; 16];
        marker.copy_from_slice(&bytes[1..17]);
        let mut owner = [0u8; 4];
        owner.copy_from_slice(&bytes[17..21]);
        Ok(LockState::Marker {
            dirty: bytes[0] == 0,
            marker: Uuid::from_bytes(marker),
            owner_pid: u32::from_be_bytes(owner),
        })
    }

    fn write(&self, state: &LockState) -> CacheLockResult<Vec<u8>> {
        match state {
            LockState::Marker {
                dirty,
                marker,
                owner_pid,
            } => {
                let mut bytes = Vec::with_capacity(self.size());
                bytes.push(u8::from(!dirty));
                bytes.extend_from_slice(marker.as_bytes());
                bytes.extend_from_slice(&owner_pid.to_be_bytes());
                Ok(bytes)
            }
            other => Err(version_mismatch(self.version(), other)),
        }
    }
}

fn encoded_bytes(bytes: &[u8], size: usize) -> CacheLockResult<&[u8]> {
    bytes.get(..size).ok_or_else(|| {
        CacheLockError::io(
            format!("decoding lock state: need {} bytes, got {}", size, bytes.len()),
            io::Error::from(io::ErrorKind::UnexpectedEof),
        )
    })
}

fn version_mismatch(expected: ProtocolVersion, state: &LockState) -> CacheLockError {
    CacheLockError::StateVersionMismatch {
        expected: expected.tag(),
        found: state.version().tag(),
    }
}
