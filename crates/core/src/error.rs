//! Error types for TesseraDB
//!
//! One unified error enum serves the whole system. Lower layers with their
//! own parse-level failures (the WAL record decoder, for instance) define
//! small local enums and convert at the boundary.
//!
//! ## Error Categories
//!
//! - **Io**: underlying file or mmap failure
//! - **Corruption**: CRC mismatch mid-log, bad magic bytes, unreadable page
//! - **InvalidArgument** / **InvalidAtomId**: caller-supplied garbage
//! - **LockContention**: a try-acquire variant lost the race
//! - **CapacityExhausted**: the cross-process gate refused a store slot
//! - **Conflict**: a prune target that is not empty
//! - **ReadOnly**: the store opened degraded after mid-log corruption

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Tessera quad store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, mmap, fsync)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (bad magic, CRC failure away from the WAL
    /// tail, unreadable page header)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Atom id does not address a record in the atom data file
    #[error("Invalid atom id: {0}")]
    InvalidAtomId(u64),

    /// A try-acquire lock variant found the lock held exclusively
    #[error("Lock contention: store lock is held")]
    LockContention,

    /// The cross-process gate could not grant a store slot in time
    #[error("Capacity exhausted: no store slot granted within {waited:?}")]
    CapacityExhausted {
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// Precondition conflict (e.g. prune transfer target is non-empty)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store is open read-only after recovery found mid-log corruption
    #[error("Store is read-only: {0}")]
    ReadOnly(String),
}

impl Error {
    /// Check whether this error indicates corrupted on-disk state.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Check whether this error is transient contention (retryable).
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::LockContention)
    }
}
