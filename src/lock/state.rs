//! Lock state values and their update transitions
//!
//! A lock state records whether the protected target region is known to be
//! consistent. Holders mark the state dirty right before mutating the
//! target region and clean again once the mutation succeeded, so a holder
//! that dies mid-update leaves a dirty state behind for the next one.

use crate::error::{CacheLockError, CacheLockResult};
use crate::lock::serializer::ProtocolVersion;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Consistency status of a lock file's target region
///
/// Values are immutable: every transition returns a new state. Two states
/// are equal when they persist to the same bytes; whether a version 1 state
/// was synthesized for a fresh file is not part of its identity.
#[derive(Debug, Clone, Copy)]
pub enum LockState {
    /// Version 1 state: a bare dirty flag, no change detection
    DirtyFlag { dirty: bool, initial: bool },
    /// Version 2 state: dirty flag, update marker and owner
    ///
    /// The marker is regenerated on every completed update. The nil marker
    /// means no holder ever completed an update. `owner_pid` is the process
    /// that last took the lock exclusively, `0` when unknown.
    Marker {
        dirty: bool,
        marker: Uuid,
        owner_pid: u32,
    },
}

impl PartialEq for LockState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::DirtyFlag { dirty: a, .. }, Self::DirtyFlag { dirty: b, .. }) => a == b,
            (
                Self::Marker {
                    dirty,
                    marker,
                    owner_pid,
                },
                Self::Marker {
                    dirty: other_dirty,
                    marker: other_marker,
                    owner_pid: other_owner,
                },
            ) => dirty == other_dirty && marker == other_marker && owner_pid == other_owner,
            _ => false,
        }
    }
}

impl Eq for LockState {}

impl Hash for LockState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version().hash(state);
        match self {
            Self::DirtyFlag { dirty, .. } => dirty.hash(state),
            Self::Marker {
                dirty,
                marker,
                owner_pid,
            } => {
                dirty.hash(state);
                marker.hash(state);
                owner_pid.hash(state);
            }
        }
    }
}

impl LockState {
    /// Protocol version able to persist this state
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::DirtyFlag { .. } => ProtocolVersion::DirtyFlag,
            Self::Marker { .. } => ProtocolVersion::Marker,
        }
    }

    /// Whether a holder started an update that was never completed
    pub fn is_dirty(&self) -> bool {
        match *self {
            Self::DirtyFlag { dirty, .. } | Self::Marker { dirty, .. } => dirty,
        }
    }

    /// Whether this state was synthesized because nobody wrote one yet
    pub fn is_in_initial_state(&self) -> bool {
        match *self {
            Self::DirtyFlag { initial, .. } => initial,
            Self::Marker { marker, .. } => marker.is_nil(),
        }
    }

    /// Whether [`has_been_updated_since`](Self::has_been_updated_since) is supported
    pub fn can_detect_changes(&self) -> bool {
        matches!(self, Self::Marker { .. })
    }

    /// Process recorded as the last exclusive holder, if the version stores one
    pub fn owner_pid(&self) -> Option<u32> {
        match *self {
            Self::Marker { owner_pid, .. } if owner_pid != 0 => Some(owner_pid),
            _ => None,
        }
    }

    /// Same state recorded as held by process `pid`
    pub fn with_owner(&self, pid: u32) -> LockState {
        match *self {
            Self::Marker { dirty, marker, .. } => Self::Marker {
                dirty,
                marker,
                owner_pid: pid,
            },
            flag @ Self::DirtyFlag { .. } => flag,
        }
    }

    /// State to persist immediately before the target region is mutated
    pub fn before_update(&self) -> LockState {
        match *self {
            Self::DirtyFlag { initial, .. } => Self::DirtyFlag {
                dirty: true,
                initial,
            },
            Self::Marker {
                marker, owner_pid, ..
            } => Self::Marker {
                dirty: true,
                marker,
                owner_pid,
            },
        }
    }

    /// State to persist once the mutation of the target region succeeded
    pub fn complete_update(&self) -> LockState {
        match *self {
            Self::DirtyFlag { .. } => Self::DirtyFlag {
                dirty: false,
                initial: false,
            },
            Self::Marker { owner_pid, .. } => Self::Marker {
                dirty: false,
                marker: new_marker(),
                owner_pid,
            },
        }
    }

    /// Whether another holder updated the target region since `other` was observed
    ///
    /// An interrupted update (a dirty state) counts as a change. The owner is
    /// ignored: taking a lock without updating changes nothing.
    pub fn has_been_updated_since(&self, other: &LockState) -> CacheLockResult<bool> {
        match (self, other) {
            (
                Self::Marker { dirty, marker, .. },
                Self::Marker {
                    marker: previous, ..
                },
            ) => Ok(*dirty || marker != previous),
            _ => Err(CacheLockError::UnsupportedCapability),
        }
    }
}

/// Random update marker; v4 UUIDs carry version bits, so never nil
fn new_marker() -> Uuid {
    Uuid::new_v4()
}
