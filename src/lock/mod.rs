//! Cross-process locking for shared cache directories
//!
//! Every cache is guarded by a lock file. The OS byte-range lock on the
//! file's information region serializes holders across processes, and the
//! lock state stored in that region tells each new holder whether the last
//! update of the cache ran to completion.
//!
//! # Lock States
//!
//! | State | Meaning | Trust contents |
//! |-------|---------|----------------|
//! | Initial | No holder ever completed an update | no |
//! | Dirty | An update started and never completed | no |
//! | Clean | The last update completed | yes |

pub mod backoff;
pub mod manager;
pub mod options;
pub mod os;
pub mod region;
pub mod serializer;
pub mod state;

pub use manager::{FileLock, FileLockManager};
pub use options::{LockMode, LockOptions, LockTarget};
pub use os::{ByteRange, LockOutcome, RangeLock};
pub use region::{LockFileHandle, LockInfo, LockRegionAccess, INFORMATION_REGION_SIZE};
pub use serializer::{DirtyFlagSerializer, LockStateSerializer, MarkerSerializer, ProtocolVersion};
pub use state::LockState;
