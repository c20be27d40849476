//! Store statistics

use tessera_storage::CacheStats;

/// A point-in-time snapshot of one store's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Live (non-tombstone) index entries
    pub quad_count: u64,
    /// Total index entries, tombstones included
    pub version_count: u64,
    /// Distinct interned terms
    pub atom_count: u64,
    /// Bytes on disk across indexes, atom data, and the WAL
    pub total_bytes: u64,
    /// Highest transaction id handed out
    pub wal_tx_id: u64,
    /// Watermark of the last checkpoint
    pub wal_checkpoint_tx_id: u64,
    /// Current WAL length in bytes
    pub wal_bytes: u64,
    /// Process-wide page cache counters
    pub cache: CacheStats,
}
