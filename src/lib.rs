//! cachelock - crash-tolerant locking for shared caches
//!
//! Serializes access to a persistent on-disk cache shared by independent
//! processes, and tells every holder whether the previous one left the
//! cache consistent.

pub mod cli;
pub mod config;
pub mod error;
pub mod lock;

pub use error::{CacheLockError, CacheLockResult};
