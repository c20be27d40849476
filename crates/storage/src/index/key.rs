//! 56-byte composite index keys
//!
//! A key packs the four quad atoms and the three temporal attributes as
//! seven big-endian 64-bit fields, in an order chosen per index. Big-endian
//! packing makes byte-lexicographic key comparison equal numeric comparison
//! field by field, so a bound prefix of the pattern maps directly onto a
//! contiguous key range.
//!
//! Times are signed milliseconds but the store's domain is non-negative
//! (with `i64::MAX` as the open-interval sentinel), where two's-complement
//! and unsigned byte order coincide.

use byteorder::{BigEndian, ByteOrder};
use tessera_core::{AtomId, Quad, QuadPattern, Timestamp, Version};

/// Key length in bytes: 7 fields × 8
pub const KEY_LEN: usize = 56;

/// A packed composite key
pub type IndexKey = [u8; KEY_LEN];

/// The seven key fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Graph,
    Subject,
    Predicate,
    Object,
    ValidFrom,
    ValidTo,
    TxTime,
}

/// Index variants, named for their key attribute order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// G, S, P, O, valid_from, valid_to, tx_time
    Gspo,
    /// G, P, O, S, valid_from, valid_to, tx_time
    Gpos,
    /// G, O, S, P, valid_from, valid_to, tx_time
    Gosp,
    /// tx_time, G, S, P, O, valid_from, valid_to
    Tgspo,
}

impl IndexKind {
    /// All four variants, in tie-break priority order
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Gspo,
        IndexKind::Gpos,
        IndexKind::Gosp,
        IndexKind::Tgspo,
    ];

    /// On-disk file name for this index
    pub fn file_name(&self) -> &'static str {
        match self {
            IndexKind::Gspo => "index.gspo",
            IndexKind::Gpos => "index.gpos",
            IndexKind::Gosp => "index.gosp",
            IndexKind::Tgspo => "index.tgspo",
        }
    }

    /// Stable discriminant stored in the index meta page
    pub fn discriminant(&self) -> u8 {
        match self {
            IndexKind::Gspo => 0,
            IndexKind::Gpos => 1,
            IndexKind::Gosp => 2,
            IndexKind::Tgspo => 3,
        }
    }

    /// Inverse of [`IndexKind::discriminant`]
    pub fn from_discriminant(raw: u8) -> Option<IndexKind> {
        match raw {
            0 => Some(IndexKind::Gspo),
            1 => Some(IndexKind::Gpos),
            2 => Some(IndexKind::Gosp),
            3 => Some(IndexKind::Tgspo),
            _ => None,
        }
    }

    fn fields(&self) -> [Field; 7] {
        use Field::*;
        match self {
            IndexKind::Gspo => [Graph, Subject, Predicate, Object, ValidFrom, ValidTo, TxTime],
            IndexKind::Gpos => [Graph, Predicate, Object, Subject, ValidFrom, ValidTo, TxTime],
            IndexKind::Gosp => [Graph, Object, Subject, Predicate, ValidFrom, ValidTo, TxTime],
            IndexKind::Tgspo => [TxTime, Graph, Subject, Predicate, Object, ValidFrom, ValidTo],
        }
    }

    /// Length of the bound leading key prefix this index gives `pattern`,
    /// in fields. `tx_range` marks a transaction-time range restriction,
    /// which only the TGSPO leading field can exploit.
    pub fn bound_prefix(&self, pattern: &QuadPattern, tx_range: bool) -> usize {
        let mut prefix = 0;
        for field in self.fields() {
            let bound = match field {
                Field::Graph => pattern.graph.is_some(),
                Field::Subject => pattern.subject.is_some(),
                Field::Predicate => pattern.predicate.is_some(),
                Field::Object => pattern.object.is_some(),
                // A range restriction binds the field for prefix purposes
                // but nothing can extend the prefix past it.
                Field::TxTime => return prefix + usize::from(tx_range),
                Field::ValidFrom | Field::ValidTo => return prefix,
            };
            if !bound {
                return prefix;
            }
            prefix += 1;
        }
        prefix
    }
}

/// Encoder/decoder for one index's key layout
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec {
    kind: IndexKind,
}

impl KeyCodec {
    /// Codec for the given index kind
    pub fn new(kind: IndexKind) -> Self {
        KeyCodec { kind }
    }

    /// Pack a quad and its temporal metadata
    pub fn encode(&self, quad: &Quad, version: &Version) -> IndexKey {
        let mut key = [0u8; KEY_LEN];
        for (i, field) in self.kind.fields().iter().enumerate() {
            let value = match field {
                Field::Graph => quad.graph.as_u64(),
                Field::Subject => quad.subject.as_u64(),
                Field::Predicate => quad.predicate.as_u64(),
                Field::Object => quad.object.as_u64(),
                Field::ValidFrom => version.valid_from.as_millis() as u64,
                Field::ValidTo => version.valid_to.as_millis() as u64,
                Field::TxTime => version.tx_time.as_millis() as u64,
            };
            BigEndian::write_u64(&mut key[i * 8..(i + 1) * 8], value);
        }
        key
    }

    /// Unpack a key back into the quad and its temporal metadata
    pub fn decode(&self, key: &IndexKey) -> (Quad, Version) {
        let mut quad = Quad::new(None, AtomId(0), AtomId(0), AtomId(0));
        let mut version = Version::current(Timestamp::EPOCH);
        for (i, field) in self.kind.fields().iter().enumerate() {
            let value = BigEndian::read_u64(&key[i * 8..(i + 1) * 8]);
            match field {
                Field::Graph => quad.graph = AtomId(value),
                Field::Subject => quad.subject = AtomId(value),
                Field::Predicate => quad.predicate = AtomId(value),
                Field::Object => quad.object = AtomId(value),
                Field::ValidFrom => version.valid_from = Timestamp::from_millis(value as i64),
                Field::ValidTo => version.valid_to = Timestamp::from_millis(value as i64),
                Field::TxTime => version.tx_time = Timestamp::from_millis(value as i64),
            }
        }
        (quad, version)
    }

    /// Inclusive scan bounds covering every entry matching the pattern's
    /// bound prefix (and a tx-time range, for the TGSPO leading field).
    pub fn scan_bounds(
        &self,
        pattern: &QuadPattern,
        tx_range: Option<(Timestamp, Timestamp)>,
    ) -> (IndexKey, IndexKey) {
        let mut lo = [0x00u8; KEY_LEN];
        let mut hi = [0xFFu8; KEY_LEN];

        for (i, field) in self.kind.fields().iter().enumerate() {
            let at = i * 8;
            let point = match field {
                Field::Graph => pattern.graph.map(|a| a.as_u64()),
                Field::Subject => pattern.subject.map(|a| a.as_u64()),
                Field::Predicate => pattern.predicate.map(|a| a.as_u64()),
                Field::Object => pattern.object.map(|a| a.as_u64()),
                Field::TxTime => {
                    if let Some((from, to)) = tx_range {
                        BigEndian::write_u64(&mut lo[at..at + 8], from.as_millis() as u64);
                        BigEndian::write_u64(&mut hi[at..at + 8], to.as_millis() as u64);
                    }
                    // A range field ends the prefix either way
                    break;
                }
                Field::ValidFrom | Field::ValidTo => break,
            };
            match point {
                Some(value) => {
                    BigEndian::write_u64(&mut lo[at..at + 8], value);
                    BigEndian::write_u64(&mut hi[at..at + 8], value);
                }
                None => break,
            }
        }
        (lo, hi)
    }
}
