//! WAL record format
//!
//! Every record is exactly 72 bytes, little-endian:
//!
//! ```text
//! ┌──────────┬──────────┬─────────────┬───────────┬──────┬──────┬──────┬──────┐
//! │ type (1) │ flags (1)│ reserved (2)│ tx_id (8) │ G (8)│ S (8)│ P (8)│ O (8)│
//! ├──────────┴──────────┴─────────────┴───────────┴──────┴──────┴──────┴──────┤
//! │ valid_from (8) │ valid_to (8) │ tx_time (8) │ crc32 (4)                   │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The CRC32 covers bytes 0–67. `Begin`, `Commit`, and `Checkpoint` records
//! carry zeroes in the quad and temporal fields; a `Checkpoint` record's
//! `tx_id` is the durability watermark. Flag bit 0 mirrors the tombstone bit
//! of the index entry a `Delete` describes.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use tessera_core::{AtomId, Quad, Timestamp, Version};

/// Record length on disk
pub const RECORD_LEN: usize = 72;
/// Bytes covered by the trailing CRC32
const CRC_COVERAGE: usize = 68;
/// Flag bit 0: the described entry is a tombstone
const FLAG_TOMBSTONE: u8 = 0b0000_0001;

/// Record type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Opens a transaction span
    Begin = 0,
    /// One quad-entry insertion
    Insert = 1,
    /// One logical deletion (tombstone entry)
    Delete = 2,
    /// Closes a transaction span; everything since `Begin` is durable
    Commit = 3,
    /// Durability watermark written by a checkpoint
    Checkpoint = 4,
}

impl RecordType {
    fn from_raw(raw: u8) -> Option<RecordType> {
        match raw {
            0 => Some(RecordType::Begin),
            1 => Some(RecordType::Insert),
            2 => Some(RecordType::Delete),
            3 => Some(RecordType::Commit),
            4 => Some(RecordType::Checkpoint),
            _ => None,
        }
    }
}

/// One fixed-size WAL record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalRecord {
    /// What this record describes
    pub record_type: RecordType,
    /// Flag bits (bit 0: tombstone)
    pub flags: u8,
    /// Transaction id; monotone across the log
    pub tx_id: u64,
    /// The quad, zeroed for control records
    pub quad: Quad,
    /// Temporal metadata, zeroed for control records
    pub version: Version,
}

impl WalRecord {
    fn control(record_type: RecordType, tx_id: u64) -> Self {
        WalRecord {
            record_type,
            flags: 0,
            tx_id,
            quad: Quad::new(None, AtomId(0), AtomId(0), AtomId(0)),
            version: Version {
                valid_from: Timestamp::EPOCH,
                valid_to: Timestamp::EPOCH,
                tx_time: Timestamp::EPOCH,
            },
        }
    }

    /// A `Begin` record opening transaction `tx_id`
    pub fn begin(tx_id: u64) -> Self {
        Self::control(RecordType::Begin, tx_id)
    }

    /// A `Commit` record closing transaction `tx_id`
    pub fn commit(tx_id: u64) -> Self {
        Self::control(RecordType::Commit, tx_id)
    }

    /// A `Checkpoint` record carrying the watermark `tx_id`
    pub fn checkpoint(watermark: u64) -> Self {
        Self::control(RecordType::Checkpoint, watermark)
    }

    /// An `Insert` record for one quad entry
    pub fn insert(tx_id: u64, quad: Quad, version: Version) -> Self {
        WalRecord {
            record_type: RecordType::Insert,
            flags: 0,
            tx_id,
            quad,
            version,
        }
    }

    /// A `Delete` record: the tombstone entry for one quad
    pub fn delete(tx_id: u64, quad: Quad, version: Version) -> Self {
        WalRecord {
            record_type: RecordType::Delete,
            flags: FLAG_TOMBSTONE,
            tx_id,
            quad,
            version,
        }
    }

    /// Whether flag bit 0 (tombstone) is set
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    /// Serialize to the fixed 72-byte wire form
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0] = self.record_type as u8;
        out[1] = self.flags;
        // bytes 2..4 reserved, zero
        LittleEndian::write_u64(&mut out[4..12], self.tx_id);
        LittleEndian::write_u64(&mut out[12..20], self.quad.graph.as_u64());
        LittleEndian::write_u64(&mut out[20..28], self.quad.subject.as_u64());
        LittleEndian::write_u64(&mut out[28..36], self.quad.predicate.as_u64());
        LittleEndian::write_u64(&mut out[36..44], self.quad.object.as_u64());
        LittleEndian::write_i64(&mut out[44..52], self.version.valid_from.as_millis());
        LittleEndian::write_i64(&mut out[52..60], self.version.valid_to.as_millis());
        LittleEndian::write_i64(&mut out[60..68], self.version.tx_time.as_millis());

        let mut hasher = Hasher::new();
        hasher.update(&out[..CRC_COVERAGE]);
        LittleEndian::write_u32(&mut out[68..72], hasher.finalize());
        out
    }

    /// Parse one 72-byte record, verifying the CRC
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Result<WalRecord, WalRecordError> {
        let stored_crc = LittleEndian::read_u32(&bytes[68..72]);
        let mut hasher = Hasher::new();
        hasher.update(&bytes[..CRC_COVERAGE]);
        let computed_crc = hasher.finalize();
        if stored_crc != computed_crc {
            return Err(WalRecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let record_type =
            RecordType::from_raw(bytes[0]).ok_or(WalRecordError::UnknownType(bytes[0]))?;

        Ok(WalRecord {
            record_type,
            flags: bytes[1],
            tx_id: LittleEndian::read_u64(&bytes[4..12]),
            quad: Quad {
                graph: AtomId(LittleEndian::read_u64(&bytes[12..20])),
                subject: AtomId(LittleEndian::read_u64(&bytes[20..28])),
                predicate: AtomId(LittleEndian::read_u64(&bytes[28..36])),
                object: AtomId(LittleEndian::read_u64(&bytes[36..44])),
            },
            version: Version {
                valid_from: Timestamp::from_millis(LittleEndian::read_i64(&bytes[44..52])),
                valid_to: Timestamp::from_millis(LittleEndian::read_i64(&bytes[52..60])),
                tx_time: Timestamp::from_millis(LittleEndian::read_i64(&bytes[60..68])),
            },
        })
    }
}

/// WAL record parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalRecordError {
    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record
        expected: u32,
        /// Checksum computed over the record bytes
        computed: u32,
    },

    /// Valid CRC but unrecognized type discriminant
    #[error("Unknown record type: {0}")]
    UnknownType(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quad() -> (Quad, Version) {
        (
            Quad::new(Some(AtomId(8)), AtomId(100), AtomId(200), AtomId(300)),
            Version {
                valid_from: Timestamp::from_millis(1_000),
                valid_to: Timestamp::FOREVER,
                tx_time: Timestamp::from_millis(1_000),
            },
        )
    }

    #[test]
    fn test_insert_roundtrip() {
        let (quad, version) = sample_quad();
        let record = WalRecord::insert(42, quad, version);

        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), RECORD_LEN);
        let parsed = WalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert!(!parsed.is_tombstone());
    }

    #[test]
    fn test_delete_carries_tombstone_flag() {
        let (quad, version) = sample_quad();
        let record = WalRecord::delete(42, quad, version);
        let parsed = WalRecord::from_bytes(&record.to_bytes()).unwrap();
        assert!(parsed.is_tombstone());
        assert_eq!(parsed.record_type, RecordType::Delete);
    }

    #[test]
    fn test_control_records() {
        for (record, expected) in [
            (WalRecord::begin(7), RecordType::Begin),
            (WalRecord::commit(7), RecordType::Commit),
            (WalRecord::checkpoint(7), RecordType::Checkpoint),
        ] {
            let parsed = WalRecord::from_bytes(&record.to_bytes()).unwrap();
            assert_eq!(parsed.record_type, expected);
            assert_eq!(parsed.tx_id, 7);
            assert_eq!(parsed.quad.graph, AtomId(0));
        }
    }

    #[test]
    fn test_forever_survives_roundtrip() {
        let (quad, version) = sample_quad();
        let parsed = WalRecord::from_bytes(&WalRecord::insert(1, quad, version).to_bytes()).unwrap();
        assert!(parsed.version.valid_to.is_forever());
    }

    #[test]
    fn test_corrupted_byte_fails_checksum() {
        let (quad, version) = sample_quad();
        let mut bytes = WalRecord::insert(1, quad, version).to_bytes();
        bytes[20] ^= 0xFF;
        assert!(matches!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_type_with_valid_crc() {
        let mut bytes = WalRecord::begin(1).to_bytes();
        bytes[0] = 9;
        // Recompute a valid CRC over the altered bytes
        let mut hasher = Hasher::new();
        hasher.update(&bytes[..68]);
        LittleEndian::write_u32(&mut bytes[68..72], hasher.finalize());

        assert_eq!(
            WalRecord::from_bytes(&bytes),
            Err(WalRecordError::UnknownType(9))
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn record_strategy() -> impl Strategy<Value = WalRecord> {
            (
                0u64..u64::MAX,
                any::<[u64; 4]>(),
                (0i64..i64::MAX, 0i64..i64::MAX, 0i64..i64::MAX),
                any::<bool>(),
            )
                .prop_map(|(tx_id, atoms, (vf, vt, tt), delete)| {
                    let quad = Quad {
                        graph: AtomId(atoms[0]),
                        subject: AtomId(atoms[1]),
                        predicate: AtomId(atoms[2]),
                        object: AtomId(atoms[3]),
                    };
                    let version = Version {
                        valid_from: Timestamp::from_millis(vf),
                        valid_to: Timestamp::from_millis(vt),
                        tx_time: Timestamp::from_millis(tt),
                    };
                    if delete {
                        WalRecord::delete(tx_id, quad, version)
                    } else {
                        WalRecord::insert(tx_id, quad, version)
                    }
                })
        }

        proptest! {
            #[test]
            fn prop_roundtrip(record in record_strategy()) {
                let parsed = WalRecord::from_bytes(&record.to_bytes()).unwrap();
                prop_assert_eq!(parsed, record);
            }

            #[test]
            fn prop_any_flipped_byte_is_detected(
                record in record_strategy(),
                at in 0usize..RECORD_LEN,
            ) {
                let mut bytes = record.to_bytes();
                bytes[at] ^= 0xFF;
                prop_assert!(WalRecord::from_bytes(&bytes).is_err());
            }
        }
    }

    #[test]
    fn test_wire_layout_offsets() {
        let (quad, version) = sample_quad();
        let bytes = WalRecord::insert(0x0102_0304, quad, version).to_bytes();

        assert_eq!(bytes[0], 1); // Insert
        assert_eq!(LittleEndian::read_u64(&bytes[4..12]), 0x0102_0304);
        assert_eq!(LittleEndian::read_u64(&bytes[12..20]), 8); // G
        assert_eq!(LittleEndian::read_u64(&bytes[20..28]), 100); // S
        assert_eq!(LittleEndian::read_i64(&bytes[52..60]), i64::MAX); // valid_to
    }
}
