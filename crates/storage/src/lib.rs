//! Storage layer for TesseraDB
//!
//! This crate implements the durable substrate of the quad store:
//!
//! - **Atoms**: append-only memory-mapped term dictionary with a resizable
//!   FNV-1a hash directory (lock-free readers, single-writer appender)
//! - **Pages**: 16 KiB page allocation over memory-mapped files, a
//!   process-wide clock-replacement page cache, pooled scratch buffers
//! - **Indexes**: four B+Trees over 56-byte temporal composite keys
//!   (GSPO, GPOS, GOSP, TGSPO), soft-delete only, linked leaves
//!
//! Durability (WAL, checkpointing) lives in `tessera-durability`; the
//! orchestration (locking, temporal queries, pools) in `tessera-engine`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atoms;
pub mod buffer;
pub mod index;
pub mod page;

pub use atoms::{AtomStore, DATA_FILE, HASH_FILE};
pub use buffer::{BufferPool, PooledBuffer, BUFFER_POOL};
pub use index::{
    EntryMeta, IndexKey, IndexKind, KeyCodec, QuadIndex, RangeScan, ScanCursor,
    INTERNAL_CAPACITY, KEY_LEN, LEAF_CAPACITY, VALUE_LEN,
};
pub use page::cache::{CacheStats, PageCache, DEFAULT_CACHE_SLOTS, PAGE_CACHE};
pub use page::{PageId, Pager, PAGE_SIZE};
