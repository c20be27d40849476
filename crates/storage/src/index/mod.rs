//! Temporal quad B+Trees
//!
//! Four disk-resident B+Trees hold the same entry multiset under different
//! key attribute orders:
//!
//! | Index | Key order | Serves |
//! |-------|-----------|--------|
//! | GSPO  | G, S, P, O, time | graph/subject-bound patterns |
//! | GPOS  | G, P, O, S, time | predicate-bound patterns |
//! | GOSP  | G, O, S, P, time | object-bound patterns |
//! | TGSPO | tx_time, G, S, P, O | transaction-time range scans |
//!
//! Keys are 56-byte big-endian composites; byte-lexicographic comparison
//! yields the range-scan semantics of each ordering. Values are 16-byte
//! metadata records carrying the tombstone bit. Removal is soft-delete only:
//! physical reclamation happens through the prune-and-switch protocol.

mod key;
mod node;
mod tree;

pub use key::{IndexKey, IndexKind, KeyCodec, KEY_LEN};
pub use node::{EntryMeta, INTERNAL_CAPACITY, LEAF_CAPACITY, VALUE_LEN};
pub use tree::{QuadIndex, RangeScan, ScanCursor};
