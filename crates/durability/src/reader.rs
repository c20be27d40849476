//! WAL recovery scan
//!
//! A forward scan over `wal.log` collecting committed `Begin … Commit`
//! spans. Two failure shapes are distinguished:
//!
//! - **Truncated tail**: a short final chunk, or a CRC failure with no valid
//!   record anywhere after it. This is the normal shape of a crash mid-write
//!   and is treated as truncation: the tail (and any unfinished span) is
//!   discarded with a warning.
//! - **Mid-log damage**: a CRC failure with a valid record at a later
//!   72-byte stride. The log cannot be trusted; the scan reports the damage
//!   and the store opens read-only.

use std::path::Path;
use tessera_core::Result;
use tracing::{debug, warn};

use crate::record::{RecordType, WalRecord, RECORD_LEN};
use crate::writer::WAL_FILE;

/// Outcome of scanning the log
#[derive(Debug)]
pub struct WalScanOutcome {
    /// Mutation records of committed transactions, in log order
    pub committed: Vec<WalRecord>,
    /// Highest transaction id seen on any valid record
    pub max_tx_id: u64,
    /// Watermark of the newest `Checkpoint` record, 0 if none
    pub checkpoint_watermark: u64,
    /// Whether a partial tail was discarded
    pub truncated_tail: bool,
    /// Byte offset of mid-log damage, if the scan found any
    pub corruption_at: Option<u64>,
    /// Length of the valid record prefix. After tail damage the caller
    /// truncates the file here so later appends stay record-aligned.
    pub valid_len: u64,
}

impl WalScanOutcome {
    fn empty() -> Self {
        WalScanOutcome {
            committed: Vec::new(),
            max_tx_id: 0,
            checkpoint_watermark: 0,
            truncated_tail: false,
            corruption_at: None,
            valid_len: 0,
        }
    }

    /// Committed mutations newer than the checkpoint watermark, i.e. the replay
    /// set.
    pub fn replay_records(&self) -> impl Iterator<Item = &WalRecord> {
        let watermark = self.checkpoint_watermark;
        self.committed.iter().filter(move |r| r.tx_id > watermark)
    }
}

/// Reader over the write-ahead log
pub struct WalReader;

impl WalReader {
    /// Scan the store's log from the beginning.
    ///
    /// Never fails on tail damage; mid-log damage is reported through
    /// [`WalScanOutcome::corruption_at`] with the committed prefix intact so
    /// the caller can still open read-only.
    pub fn scan(store_dir: &Path) -> Result<WalScanOutcome> {
        let path = store_dir.join(WAL_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WalScanOutcome::empty())
            }
            Err(e) => return Err(e.into()),
        };

        let mut outcome = WalScanOutcome::empty();
        let mut open_span: Option<(u64, Vec<WalRecord>)> = None;
        let mut offset = 0usize;

        while offset + RECORD_LEN <= bytes.len() {
            let raw: &[u8; RECORD_LEN] = bytes[offset..offset + RECORD_LEN]
                .try_into()
                .expect("bounds checked");

            let record = match WalRecord::from_bytes(raw) {
                Ok(record) => record,
                Err(e) => {
                    if Self::valid_record_after(&bytes, offset + RECORD_LEN) {
                        warn!(
                            target: "tessera::recovery",
                            offset,
                            error = %e,
                            "WAL damaged mid-log, opening read-only"
                        );
                        outcome.corruption_at = Some(offset as u64);
                    } else {
                        warn!(
                            target: "tessera::recovery",
                            offset,
                            error = %e,
                            "discarding damaged WAL tail"
                        );
                        outcome.truncated_tail = true;
                    }
                    open_span = None;
                    break;
                }
            };

            outcome.max_tx_id = outcome.max_tx_id.max(record.tx_id);
            match record.record_type {
                RecordType::Begin => {
                    // A Begin while a span is open means the previous span
                    // never committed; it is discarded.
                    open_span = Some((record.tx_id, Vec::new()));
                }
                RecordType::Insert | RecordType::Delete => {
                    if let Some((_, mutations)) = open_span.as_mut() {
                        mutations.push(record);
                    }
                }
                RecordType::Commit => {
                    if let Some((tx_id, mutations)) = open_span.take() {
                        if tx_id == record.tx_id {
                            outcome.committed.extend(mutations);
                        }
                    }
                }
                RecordType::Checkpoint => {
                    outcome.checkpoint_watermark =
                        outcome.checkpoint_watermark.max(record.tx_id);
                }
            }
            offset += RECORD_LEN;
        }

        outcome.valid_len = offset as u64;
        if outcome.corruption_at.is_none() && offset < bytes.len() && !outcome.truncated_tail {
            // Short final chunk: crash mid-append
            outcome.truncated_tail = true;
            warn!(
                target: "tessera::recovery",
                offset,
                tail_bytes = bytes.len() - offset,
                "discarding short WAL tail"
            );
        }
        if open_span.is_some() {
            debug!(
                target: "tessera::recovery",
                "discarding uncommitted trailing transaction"
            );
        }

        debug!(
            target: "tessera::recovery",
            committed = outcome.committed.len(),
            max_tx_id = outcome.max_tx_id,
            watermark = outcome.checkpoint_watermark,
            "WAL scan complete"
        );
        Ok(outcome)
    }

    /// Whether any later 72-byte stride parses as a valid record, the
    /// discriminator between tail truncation and mid-log damage.
    fn valid_record_after(bytes: &[u8], mut offset: usize) -> bool {
        while offset + RECORD_LEN <= bytes.len() {
            let raw: &[u8; RECORD_LEN] = bytes[offset..offset + RECORD_LEN]
                .try_into()
                .expect("bounds checked");
            if WalRecord::from_bytes(raw).is_ok() {
                return true;
            }
            offset += RECORD_LEN;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WalWriter;
    use tessera_core::{AtomId, Quad, Timestamp, Version};
    use tempfile::tempdir;

    fn quad(n: u64) -> (Quad, Version) {
        (
            Quad::new(None, AtomId(n), AtomId(n + 1), AtomId(n + 2)),
            Version::current(Timestamp::from_millis(1000)),
        )
    }

    fn write_transactions(dir: &Path, count: u64) -> WalWriter {
        let mut writer = WalWriter::open(dir, 1, 0).unwrap();
        for n in 0..count {
            let (q, v) = quad(n * 10 + 8);
            let tx = writer.begin_tx();
            writer.append_transaction(tx, &[WalRecord::insert(tx, q, v)], true).unwrap();
        }
        writer
    }

    #[test]
    fn test_missing_log_scans_empty() {
        let dir = tempdir().unwrap();
        let outcome = WalReader::scan(dir.path()).unwrap();
        assert!(outcome.committed.is_empty());
        assert_eq!(outcome.max_tx_id, 0);
        assert!(!outcome.truncated_tail);
        assert!(outcome.corruption_at.is_none());
    }

    #[test]
    fn test_committed_spans_are_collected() {
        let dir = tempdir().unwrap();
        write_transactions(dir.path(), 3);

        let outcome = WalReader::scan(dir.path()).unwrap();
        assert_eq!(outcome.committed.len(), 3);
        assert_eq!(outcome.max_tx_id, 3);
        assert_eq!(outcome.committed[0].quad.subject, AtomId(8));
        assert_eq!(outcome.committed[2].quad.subject, AtomId(28));
    }

    #[test]
    fn test_uncommitted_span_is_discarded() {
        let dir = tempdir().unwrap();
        let mut writer = write_transactions(dir.path(), 2);

        // A Begin + Insert with no Commit, the crash-mid-batch shape
        let tx = writer.begin_tx();
        writer.append(&WalRecord::begin(tx)).unwrap();
        let (q, v) = quad(1000);
        writer.append(&WalRecord::insert(tx, q, v)).unwrap();
        writer.sync().unwrap();

        let outcome = WalReader::scan(dir.path()).unwrap();
        assert_eq!(outcome.committed.len(), 2);
        assert_eq!(outcome.max_tx_id, 3);
    }

    #[test]
    fn test_short_tail_is_truncation() {
        let dir = tempdir().unwrap();
        write_transactions(dir.path(), 2);

        let path = dir.path().join(WAL_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xAA; 17]); // partial append
        std::fs::write(&path, bytes).unwrap();

        let outcome = WalReader::scan(dir.path()).unwrap();
        assert_eq!(outcome.committed.len(), 2);
        assert!(outcome.truncated_tail);
        assert!(outcome.corruption_at.is_none());
        // The valid prefix excludes the partial append
        assert_eq!(outcome.valid_len, 6 * RECORD_LEN as u64);
    }

    #[test]
    fn test_corrupt_final_record_is_truncation() {
        let dir = tempdir().unwrap();
        write_transactions(dir.path(), 2);

        let path = dir.path().join(WAL_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - RECORD_LEN;
        bytes[last + 10] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let outcome = WalReader::scan(dir.path()).unwrap();
        // The damaged Commit kills the final span
        assert_eq!(outcome.committed.len(), 1);
        assert!(outcome.truncated_tail);
        assert!(outcome.corruption_at.is_none());
    }

    #[test]
    fn test_mid_log_damage_is_corruption() {
        let dir = tempdir().unwrap();
        write_transactions(dir.path(), 4);

        let path = dir.path().join(WAL_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[RECORD_LEN + 5] ^= 0xFF; // damage inside the first transaction
        std::fs::write(&path, bytes).unwrap();

        let outcome = WalReader::scan(dir.path()).unwrap();
        assert_eq!(outcome.corruption_at, Some(RECORD_LEN as u64));
        // Only records before the damage survive
        assert!(outcome.committed.is_empty());
    }

    #[test]
    fn test_watermark_filters_replay_set() {
        let dir = tempdir().unwrap();
        let mut writer = write_transactions(dir.path(), 5);
        writer.checkpoint(3).unwrap();

        let outcome = WalReader::scan(dir.path()).unwrap();
        assert_eq!(outcome.checkpoint_watermark, 3);
        let replay: Vec<_> = outcome.replay_records().collect();
        assert_eq!(replay.len(), 2);
        assert!(replay.iter().all(|r| r.tx_id > 3));
    }
}
