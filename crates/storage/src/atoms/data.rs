//! Append-only atom data file
//!
//! File layout:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic "TATD" (4) │ version(4)│
//! ├──────────────────────────────┤
//! │ len: u32 LE │ term bytes     │
//! ├──────────────────────────────┤
//! │ len: u32 LE │ term bytes     │
//! │ ...                          │
//! └──────────────────────────────┘
//! ```
//!
//! The file is zero-extended in chunks ahead of the committed watermark, so
//! a zero length field marks the end of data. Record offsets are handed out
//! as atom ids; the header guarantees no record sits at offset 0.

use memmap2::Mmap;
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Error, Result};

/// Magic bytes identifying an atom data file
const MAGIC: &[u8; 4] = b"TATD";
/// Current format version
const VERSION: u32 = 1;
/// Header size: magic(4) + version(4)
pub const DATA_HEADER_SIZE: u64 = 8;
/// Growth granularity for the zero-extended tail
const GROW_CHUNK: u64 = 256 * 1024;

/// The append-only term data file with a shared read mapping
pub struct AtomData {
    file: std::fs::File,
    map: RwLock<Arc<Mmap>>,
    /// Bytes committed, header included. Readers must not look past this.
    committed: AtomicU64,
    /// Current file length (committed + zeroed headroom)
    capacity: AtomicU64,
}

impl AtomData {
    /// Open or create the data file, validating the header and scanning for
    /// the committed watermark.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            let mut header = [0u8; DATA_HEADER_SIZE as usize];
            header[0..4].copy_from_slice(MAGIC);
            header[4..8].copy_from_slice(&VERSION.to_le_bytes());
            file.write_all(&header)?;
            file.set_len(GROW_CHUNK)?;
        } else if len < DATA_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "atom data file {} shorter than its header",
                path.display()
            )));
        }

        // SAFETY: read-only mapping; the file handle outlives it.
        let map = unsafe { Mmap::map(&file)? };

        if &map[0..4] != MAGIC {
            return Err(Error::Corruption(format!(
                "atom data file {} has bad magic bytes",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(map[4..8].try_into().expect("header mapped"));
        if version != VERSION {
            return Err(Error::Corruption(format!(
                "atom data file {} has unsupported version {}",
                path.display(),
                version
            )));
        }

        let capacity = file.metadata()?.len();
        let committed = Self::scan_committed(&map, capacity);

        Ok(AtomData {
            file,
            map: RwLock::new(Arc::new(map)),
            committed: AtomicU64::new(committed),
            capacity: AtomicU64::new(capacity),
        })
    }

    /// Walk records from the header until a zero length field or a partial
    /// tail; everything before that point is committed.
    fn scan_committed(map: &Mmap, capacity: u64) -> u64 {
        let mut pos = DATA_HEADER_SIZE;
        loop {
            if pos + 4 > capacity {
                return pos.min(capacity);
            }
            let at = pos as usize;
            let len = u32::from_le_bytes(map[at..at + 4].try_into().expect("bounds checked")) as u64;
            if len == 0 || pos + 4 + len > capacity {
                return pos;
            }
            pos += 4 + len;
        }
    }

    /// Append one term record; returns its offset (the atom id).
    ///
    /// Caller must hold the store's writer mutex; appends are single-writer.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let offset = self.committed.load(Ordering::Acquire);
        let needed = offset + 4 + bytes.len() as u64;

        if needed > self.capacity.load(Ordering::Acquire) {
            self.grow_to(needed)?;
        }

        let mut writer = &self.file;
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(bytes)?;

        // Publish after the bytes are in the shared mapping's pages.
        self.committed.store(needed, Ordering::Release);
        Ok(offset)
    }

    /// Re-extend the file and republish the read mapping.
    fn grow_to(&self, needed: u64) -> Result<()> {
        let new_capacity = needed + GROW_CHUNK - needed % GROW_CHUNK;
        self.file.set_len(new_capacity)?;
        // SAFETY: read-only mapping over the same held-open file.
        let remapped = unsafe { Mmap::map(&self.file)? };
        *self.map.write() = Arc::new(remapped);
        self.capacity.store(new_capacity, Ordering::Release);
        Ok(())
    }

    /// Read the term bytes at `offset`.
    ///
    /// Copies out of the mapping so the result is independent of later
    /// growth. Fails with `InvalidAtomId` when the offset does not address a
    /// committed record.
    pub fn get(&self, offset: u64) -> Result<Vec<u8>> {
        let committed = self.committed.load(Ordering::Acquire);
        if offset < DATA_HEADER_SIZE || offset + 4 > committed {
            return Err(Error::InvalidAtomId(offset));
        }

        let map = self.snapshot();
        let at = offset as usize;
        let len = u32::from_le_bytes(map[at..at + 4].try_into().expect("bounds checked")) as u64;
        if len == 0 || offset + 4 + len > committed {
            return Err(Error::InvalidAtomId(offset));
        }
        Ok(map[at + 4..at + 4 + len as usize].to_vec())
    }

    /// Current read mapping. The committed watermark is loaded before the
    /// snapshot, so a mapping taken here always covers it.
    fn snapshot(&self) -> Arc<Mmap> {
        Arc::clone(&self.map.read())
    }

    /// Bytes committed, header included
    pub fn committed_len(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Iterate `(offset, bytes)` over all committed records (directory
    /// rebuild path).
    pub fn scan(&self) -> DataScan {
        DataScan {
            map: self.snapshot(),
            committed: self.committed_len(),
            pos: DATA_HEADER_SIZE,
        }
    }

    /// fsync the data file
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Iterator over committed records in the data file
///
/// Holds its own mapping snapshot, so it stays valid across concurrent
/// appends (which it will not observe).
pub struct DataScan {
    map: Arc<Mmap>,
    committed: u64,
    pos: u64,
}

impl Iterator for DataScan {
    type Item = (u64, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 4 > self.committed {
            return None;
        }
        let at = self.pos as usize;
        let len = u32::from_le_bytes(self.map[at..at + 4].try_into().expect("bounds checked")) as u64;
        if len == 0 || self.pos + 4 + len > self.committed {
            return None;
        }
        let offset = self.pos;
        let bytes = self.map[at + 4..at + 4 + len as usize].to_vec();
        self.pos += 4 + len;
        Some((offset, bytes))
    }
}
