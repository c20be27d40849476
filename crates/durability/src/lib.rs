//! Durability layer for TesseraDB
//!
//! The write-ahead log and its recovery machinery:
//!
//! - **Record**: fixed 72-byte little-endian records with a trailing CRC32
//! - **Writer**: appends records, owns the checkpoint truncation rewrite
//! - **Reader**: forward recovery scan distinguishing a truncated tail
//!   (normal crash) from mid-log damage (fatal, read-only open)
//! - **Checkpoint**: the hybrid size-or-time trigger
//!
//! The engine crate drives these: it writes `Begin … Commit` spans under
//! the store's write lock, replays the scan outcome on open, and runs
//! checkpoints when the policy fires.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod checkpoint;
mod reader;
mod record;
mod writer;

pub use checkpoint::{CheckpointPolicy, DEFAULT_MAX_INTERVAL, DEFAULT_MAX_WAL_BYTES};
pub use reader::{WalReader, WalScanOutcome};
pub use record::{RecordType, WalRecord, WalRecordError, RECORD_LEN};
pub use writer::{WalWriter, WAL_FILE};
