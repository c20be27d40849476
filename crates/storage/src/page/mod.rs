//! Fixed-size page allocation over memory-mapped files
//!
//! Every index file is a sequence of 16 KiB pages addressed by a `u32` page
//! id. The [`Pager`] owns the file and its writable mapping; it grows the
//! file in zero-filled chunks and remaps when an allocation outruns the
//! mapping. Page 0 of every index file is the index meta page; the pager
//! itself is format-agnostic and hands out raw page slices.
//!
//! Growth never moves committed data: pages are only ever appended, so a
//! page id stays valid for the file's life.

pub mod cache;

use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tessera_core::{Error, Result};

/// Page size in bytes (16 KiB)
pub const PAGE_SIZE: usize = 16 * 1024;

/// File growth granularity, in pages. Growing in chunks keeps the
/// set_len/remap cycle off the per-allocation path.
const GROW_CHUNK_PAGES: u32 = 64;

/// Page id: an index into the file, `0` addressing the first page
pub type PageId = u32;

/// Process-unique id assigned to each pager, used to key the shared page
/// cache across stores and files
static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// A paged, memory-mapped file
pub struct Pager {
    file: std::fs::File,
    map: MmapMut,
    path: PathBuf,
    /// Pages the current mapping covers (file length / PAGE_SIZE)
    capacity_pages: u32,
    /// Process-unique cache key component
    file_id: u32,
}

impl Pager {
    /// Open or create a paged file.
    ///
    /// A fresh file is extended to one growth chunk so the mapping is never
    /// empty; callers track how many pages are actually in use (the pager
    /// only tracks capacity).
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let capacity_pages = if len == 0 {
            file.set_len(GROW_CHUNK_PAGES as u64 * PAGE_SIZE as u64)?;
            GROW_CHUNK_PAGES
        } else {
            if len % PAGE_SIZE as u64 != 0 {
                return Err(Error::Corruption(format!(
                    "page file {} has length {} not a multiple of the page size",
                    path.display(),
                    len
                )));
            }
            (len / PAGE_SIZE as u64) as u32
        };

        // SAFETY: the file is held open for the mapping's lifetime and all
        // access goes through the slice APIs below.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Pager {
            file,
            map,
            path: path.to_path_buf(),
            capacity_pages,
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Process-unique id for page-cache keys
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Pages the current file can hold without growing
    pub fn capacity_pages(&self) -> u32 {
        self.capacity_pages
    }

    /// File length in bytes
    pub fn len_bytes(&self) -> u64 {
        self.capacity_pages as u64 * PAGE_SIZE as u64
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grow the file (zero-filled, chunk-rounded) until it holds at least
    /// `pages` pages. A no-op when capacity already suffices.
    pub fn ensure_capacity(&mut self, pages: u32) -> Result<()> {
        if pages <= self.capacity_pages {
            return Ok(());
        }
        let new_capacity = pages
            .checked_add(GROW_CHUNK_PAGES - pages % GROW_CHUNK_PAGES)
            .ok_or_else(|| Error::InvalidArgument("page file capacity overflow".into()))?;
        self.file
            .set_len(new_capacity as u64 * PAGE_SIZE as u64)?;
        // SAFETY: same file, new length; the old mapping is dropped first.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        self.capacity_pages = new_capacity;
        Ok(())
    }

    /// Read-only view of one page
    pub fn page(&self, id: PageId) -> Result<&[u8]> {
        let start = self.page_range(id)?;
        Ok(&self.map[start..start + PAGE_SIZE])
    }

    /// Writable view of one page
    pub fn page_mut(&mut self, id: PageId) -> Result<&mut [u8]> {
        let start = self.page_range(id)?;
        Ok(&mut self.map[start..start + PAGE_SIZE])
    }

    /// Flush the mapping and fsync the file
    pub fn sync(&self) -> Result<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn page_range(&self, id: PageId) -> Result<usize> {
        if id >= self.capacity_pages {
            return Err(Error::Corruption(format!(
                "page {} out of range for {} ({} pages mapped)",
                id,
                self.path.display(),
                self.capacity_pages
            )));
        }
        Ok(id as usize * PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_fresh_file_has_chunk_capacity() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("index.test")).unwrap();
        assert_eq!(pager.capacity_pages(), GROW_CHUNK_PAGES);
        assert_eq!(pager.len_bytes(), GROW_CHUNK_PAGES as u64 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("index.test")).unwrap();

        pager.page_mut(3).unwrap()[0..4].copy_from_slice(b"page");
        assert_eq!(&pager.page(3).unwrap()[0..4], b"page");
        // Untouched pages are zero-filled
        assert!(pager.page(4).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_growth_preserves_data() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(&dir.path().join("index.test")).unwrap();

        pager.page_mut(0).unwrap()[0] = 0xAB;
        pager.ensure_capacity(GROW_CHUNK_PAGES * 3 + 1).unwrap();

        assert!(pager.capacity_pages() >= GROW_CHUNK_PAGES * 3 + 1);
        assert_eq!(pager.page(0).unwrap()[0], 0xAB);
    }

    #[test]
    fn test_out_of_range_page_is_corruption() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(&dir.path().join("index.test")).unwrap();
        let err = pager.page(pager.capacity_pages()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_reopen_keeps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.test");
        {
            let mut pager = Pager::open(&path).unwrap();
            pager.page_mut(7).unwrap()[100] = 42;
            pager.sync().unwrap();
        }
        let pager = Pager::open(&path).unwrap();
        assert_eq!(pager.page(7).unwrap()[100], 42);
    }

    #[test]
    fn test_file_ids_are_unique() {
        let dir = tempdir().unwrap();
        let a = Pager::open(&dir.path().join("a")).unwrap();
        let b = Pager::open(&dir.path().join("b")).unwrap();
        assert_ne!(a.file_id(), b.file_id());
    }
}
