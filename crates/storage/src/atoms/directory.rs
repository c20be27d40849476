//! Resizable FNV-1a hash directory over the atom data file
//!
//! The directory maps a 32-bit fingerprint of the term bytes to the term's
//! offset in the data file. Slots are `(fp32, offset64)`; offset 0 means
//! empty. Collisions are resolved by linear probing plus a byte comparison
//! against the data file.
//!
//! The live table is an in-memory array of atomic slots shared through an
//! `Arc`: readers probe lock-free, the single writer publishes a slot by
//! storing the fingerprint first and the offset last. Growth builds a
//! doubled table and swaps the `Arc`; readers still holding the old one
//! finish their probe on it and simply retry under the writer lock on a
//! miss.
//!
//! `atoms.hash` persists a snapshot of the table:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ magic "TATH" (4) │ version (4) │ capacity (8)         │
//! │ count (8)        │ data_len (8)                       │
//! ├───────────────────────────────────────────────────────┤
//! │ capacity × (fp: u32 LE, offset: u64 LE)               │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! `data_len` records the data-file watermark the snapshot covers; a
//! mismatch at open means the snapshot is stale and the table is rebuilt by
//! scanning `atoms.data`.

use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tessera_core::{Error, Result};

use super::data::AtomData;

/// Magic bytes identifying a hash directory snapshot
const MAGIC: &[u8; 4] = b"TATH";
/// Current format version
const VERSION: u32 = 1;
/// Header size: magic(4) + version(4) + capacity(8) + count(8) + data_len(8)
const HEADER_SIZE: usize = 32;
/// Bytes per slot: fp(4) + offset(8)
const SLOT_SIZE: usize = 12;
/// Initial slot count for an empty store
pub const INITIAL_CAPACITY: usize = 1024;
/// Grow when occupancy crosses this fraction
const MAX_LOAD_NUM: u64 = 7;
const MAX_LOAD_DEN: u64 = 10;

/// FNV-1a 32-bit hash of the term bytes, the directory's fingerprint
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

struct Slot {
    fp: AtomicU32,
    offset: AtomicU64,
}

/// One immutable-capacity probe table; growth replaces the whole directory
pub struct Directory {
    slots: Box<[Slot]>,
    mask: usize,
    count: AtomicU64,
}

impl Directory {
    /// Create an empty directory with `capacity` slots (power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(INITIAL_CAPACITY);
        let slots = (0..capacity)
            .map(|_| Slot {
                fp: AtomicU32::new(0),
                offset: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Directory {
            slots,
            mask: capacity - 1,
            count: AtomicU64::new(0),
        }
    }

    /// Rebuild a directory by scanning every committed record in the data
    /// file. Used when the persisted snapshot is missing or stale.
    pub fn rebuild(data: &AtomData) -> Self {
        let entries: Vec<(u64, Vec<u8>)> = data.scan().collect();
        let needed = (entries.len().max(1) * MAX_LOAD_DEN as usize) / MAX_LOAD_NUM as usize;
        let dir = Directory::with_capacity(needed.next_power_of_two());
        for (offset, bytes) in entries {
            dir.publish(fnv1a32(&bytes), offset);
        }
        dir
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Whether the directory holds no atoms
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether one more insert would cross the load-factor bound
    pub fn needs_grow(&self) -> bool {
        (self.len() + 1) * MAX_LOAD_DEN > self.capacity() as u64 * MAX_LOAD_NUM
    }

    /// Lock-free probe for `bytes`.
    ///
    /// Returns the offset of the matching record, or `None` after hitting an
    /// empty slot (or a full sweep). A fingerprint hit is confirmed by byte
    /// comparison against the data file before it counts.
    pub fn lookup(&self, bytes: &[u8], fp: u32, data: &AtomData) -> Result<Option<u64>> {
        let mut idx = fp as usize & self.mask;
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let offset = slot.offset.load(Ordering::Acquire);
            if offset == 0 {
                return Ok(None);
            }
            if slot.fp.load(Ordering::Acquire) == fp && data.get(offset)? == bytes {
                return Ok(Some(offset));
            }
            idx = (idx + 1) & self.mask;
        }
        Ok(None)
    }

    /// Publish `(fp, offset)` into the first free slot of its probe chain.
    ///
    /// Caller must hold the writer mutex and have already appended the term
    /// bytes; the offset store is the publication point readers key on.
    pub fn publish(&self, fp: u32, offset: u64) {
        debug_assert_ne!(offset, 0, "offset 0 is the empty-slot sentinel");
        let mut idx = fp as usize & self.mask;
        loop {
            let slot = &self.slots[idx];
            if slot.offset.load(Ordering::Acquire) == 0 {
                slot.fp.store(fp, Ordering::Release);
                slot.offset.store(offset, Ordering::Release);
                self.count.fetch_add(1, Ordering::AcqRel);
                return;
            }
            idx = (idx + 1) & self.mask;
        }
    }

    /// Build the doubled successor table with every live entry reinserted.
    pub fn grown(&self) -> Directory {
        let next = Directory::with_capacity(self.capacity() * 2);
        for slot in self.slots.iter() {
            let offset = slot.offset.load(Ordering::Acquire);
            if offset != 0 {
                next.publish(slot.fp.load(Ordering::Acquire), offset);
            }
        }
        next
    }

    /// Persist a snapshot covering `data_len` committed data bytes.
    ///
    /// Written to a temp file and renamed into place, so a crash never
    /// leaves a half-written directory.
    pub fn write_to(&self, path: &Path, data_len: u64) -> Result<()> {
        let tmp = path.with_extension("hash.tmp");
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.capacity() * SLOT_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.capacity() as u64).to_le_bytes());
        buf.extend_from_slice(&self.len().to_le_bytes());
        buf.extend_from_slice(&data_len.to_le_bytes());
        for slot in self.slots.iter() {
            buf.extend_from_slice(&slot.fp.load(Ordering::Acquire).to_le_bytes());
            buf.extend_from_slice(&slot.offset.load(Ordering::Acquire).to_le_bytes());
        }

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load the persisted snapshot if it exists and matches `data_len`.
    ///
    /// Returns `None` when the file is absent, truncated, malformed, or
    /// covers a different data watermark. Callers rebuild in that case.
    pub fn load_from(path: &Path, data_len: u64) -> Result<Option<Directory>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Ok(None);
        }
        if LittleEndian::read_u32(&bytes[4..8]) != VERSION {
            return Ok(None);
        }
        let capacity = LittleEndian::read_u64(&bytes[8..16]) as usize;
        let count = LittleEndian::read_u64(&bytes[16..24]);
        let snapshot_data_len = LittleEndian::read_u64(&bytes[24..32]);

        if !capacity.is_power_of_two()
            || bytes.len() != HEADER_SIZE + capacity * SLOT_SIZE
            || snapshot_data_len != data_len
        {
            return Ok(None);
        }

        let dir = Directory::with_capacity(capacity);
        let mut loaded = 0u64;
        for (i, slot) in dir.slots.iter().enumerate() {
            let at = HEADER_SIZE + i * SLOT_SIZE;
            let fp = LittleEndian::read_u32(&bytes[at..at + 4]);
            let offset = LittleEndian::read_u64(&bytes[at + 4..at + 12]);
            if offset != 0 {
                slot.fp.store(fp, Ordering::Relaxed);
                slot.offset.store(offset, Ordering::Relaxed);
                loaded += 1;
            }
        }
        if loaded != count {
            return Ok(None);
        }
        dir.count.store(loaded, Ordering::Release);
        Ok(Some(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn data_with(terms: &[&str]) -> (tempfile::TempDir, AtomData, Vec<u64>) {
        let dir = tempdir().unwrap();
        let data = AtomData::open(&dir.path().join("atoms.data")).unwrap();
        let offsets = terms
            .iter()
            .map(|t| data.append(t.as_bytes()).unwrap())
            .collect();
        (dir, data, offsets)
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        // Standard FNV-1a 32-bit test vectors
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_publish_then_lookup() {
        let (_t, data, offsets) = data_with(&["<a>", "<b>"]);
        let dir = Directory::with_capacity(INITIAL_CAPACITY);

        dir.publish(fnv1a32(b"<a>"), offsets[0]);
        dir.publish(fnv1a32(b"<b>"), offsets[1]);

        assert_eq!(
            dir.lookup(b"<a>", fnv1a32(b"<a>"), &data).unwrap(),
            Some(offsets[0])
        );
        assert_eq!(
            dir.lookup(b"<b>", fnv1a32(b"<b>"), &data).unwrap(),
            Some(offsets[1])
        );
        assert_eq!(dir.lookup(b"<c>", fnv1a32(b"<c>"), &data).unwrap(), None);
    }

    #[test]
    fn test_fingerprint_collision_resolved_by_bytes() {
        let (_t, data, offsets) = data_with(&["<x>", "<y>"]);
        let dir = Directory::with_capacity(INITIAL_CAPACITY);

        // Force both terms into the same probe chain with the same fp
        let fp = 42;
        dir.publish(fp, offsets[0]);
        dir.publish(fp, offsets[1]);

        assert_eq!(dir.lookup(b"<x>", fp, &data).unwrap(), Some(offsets[0]));
        assert_eq!(dir.lookup(b"<y>", fp, &data).unwrap(), Some(offsets[1]));
    }

    #[test]
    fn test_grow_keeps_every_entry() {
        let terms: Vec<String> = (0..100).map(|i| format!("<term/{i}>")).collect();
        let refs: Vec<&str> = terms.iter().map(|s| s.as_str()).collect();
        let (_t, data, offsets) = data_with(&refs);

        let dir = Directory::with_capacity(INITIAL_CAPACITY);
        for (term, offset) in terms.iter().zip(&offsets) {
            dir.publish(fnv1a32(term.as_bytes()), *offset);
        }

        let grown = dir.grown();
        assert_eq!(grown.capacity(), dir.capacity() * 2);
        assert_eq!(grown.len(), dir.len());
        for (term, offset) in terms.iter().zip(&offsets) {
            assert_eq!(
                grown
                    .lookup(term.as_bytes(), fnv1a32(term.as_bytes()), &data)
                    .unwrap(),
                Some(*offset)
            );
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (t, data, offsets) = data_with(&["<a>", "<b>", "<c>"]);
        let dir = Directory::with_capacity(INITIAL_CAPACITY);
        for (term, offset) in ["<a>", "<b>", "<c>"].iter().zip(&offsets) {
            dir.publish(fnv1a32(term.as_bytes()), *offset);
        }

        let path = t.path().join("atoms.hash");
        dir.write_to(&path, data.committed_len()).unwrap();

        let loaded = Directory::load_from(&path, data.committed_len())
            .unwrap()
            .expect("snapshot matches watermark");
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            loaded.lookup(b"<b>", fnv1a32(b"<b>"), &data).unwrap(),
            Some(offsets[1])
        );
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let (t, data, offsets) = data_with(&["<a>"]);
        let dir = Directory::with_capacity(INITIAL_CAPACITY);
        dir.publish(fnv1a32(b"<a>"), offsets[0]);

        let path = t.path().join("atoms.hash");
        dir.write_to(&path, data.committed_len()).unwrap();

        // The data file moves on; the snapshot no longer matches
        data.append(b"<b>").unwrap();
        assert!(Directory::load_from(&path, data.committed_len())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rebuild_matches_data() {
        let terms: Vec<String> = (0..50).map(|i| format!("\"lit {i}\"")).collect();
        let refs: Vec<&str> = terms.iter().map(|s| s.as_str()).collect();
        let (_t, data, offsets) = data_with(&refs);

        let dir = Directory::rebuild(&data);
        assert_eq!(dir.len(), 50);
        for (term, offset) in terms.iter().zip(&offsets) {
            assert_eq!(
                dir.lookup(term.as_bytes(), fnv1a32(term.as_bytes()), &data)
                    .unwrap(),
                Some(*offset)
            );
        }
    }
}
