//! The disk-resident B+Tree

use std::path::Path;
use tessera_core::{CancelToken, Error, Result};
use tracing::debug;

use super::key::{IndexKey, IndexKind, KeyCodec};
use super::node::{
    EntryMeta, InternalMut, InternalRef, LeafMut, LeafRef, MetaMut, MetaRef, INTERNAL_CAPACITY,
    LEAF_CAPACITY, META_MAGIC, META_VERSION, NODE_INTERNAL, NODE_LEAF,
};
use crate::page::cache::PAGE_CACHE;
use crate::page::{PageId, Pager, PAGE_SIZE};

/// One quad index: a B+Tree over 56-byte composite keys
///
/// Keys are never physically removed; logical deletion sets the tombstone
/// bit in the entry's value. Duplicate insertion of an identical key is a
/// no-op, which keeps WAL replay idempotent.
pub struct QuadIndex {
    pager: Pager,
    kind: IndexKind,
    codec: KeyCodec,
}

impl QuadIndex {
    /// Open or create the index file for `kind` inside a store directory.
    pub fn open(store_dir: &Path, kind: IndexKind) -> Result<Self> {
        let pager = Pager::open(&store_dir.join(kind.file_name()))?;
        let mut index = QuadIndex {
            pager,
            kind,
            codec: KeyCodec::new(kind),
        };

        let meta = MetaRef::new(index.pager.page(0)?);
        if meta.is_blank() {
            MetaMut::new(index.pager.page_mut(0)?).init(kind.discriminant());
            debug!(target: "tessera::index", index = kind.file_name(), "initialized fresh index");
        } else {
            if meta.magic() != META_MAGIC {
                return Err(Error::Corruption(format!(
                    "{} has bad magic bytes",
                    kind.file_name()
                )));
            }
            if meta.version() != META_VERSION {
                return Err(Error::Corruption(format!(
                    "{} has unsupported version {}",
                    kind.file_name(),
                    meta.version()
                )));
            }
            if meta.kind_discriminant() != kind.discriminant() {
                return Err(Error::Corruption(format!(
                    "{} holds a different index kind",
                    kind.file_name()
                )));
            }
            let pages = meta.page_count();
            if pages as u64 * PAGE_SIZE as u64 > index.pager.len_bytes() {
                return Err(Error::Corruption(format!(
                    "{} meta claims {} pages beyond the file length",
                    kind.file_name(),
                    pages
                )));
            }
        }
        Ok(index)
    }

    /// This index's attribute ordering
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Key codec for this index's layout
    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Live + tombstone entries in the tree
    pub fn entry_count(&self) -> Result<u64> {
        Ok(MetaRef::new(self.pager.page(0)?).entry_count())
    }

    /// Entries whose tombstone bit is set
    pub fn tombstone_count(&self) -> Result<u64> {
        Ok(MetaRef::new(self.pager.page(0)?).tombstone_count())
    }

    /// File size in bytes
    pub fn len_bytes(&self) -> u64 {
        self.pager.len_bytes()
    }

    /// Flush dirty pages and fsync the file
    pub fn flush(&self) -> Result<()> {
        self.pager.sync()
    }

    /// Drop this index's page-cache slots (store close/clear path)
    pub fn invalidate_cache(&self) {
        PAGE_CACHE.invalidate_file(self.pager.file_id());
    }

    /// Insert an entry. Returns `false` (and changes nothing) when an
    /// identical key is already present.
    pub fn insert(&mut self, key: &IndexKey, meta: EntryMeta) -> Result<bool> {
        let root = MetaRef::new(self.pager.page(0)?).root();
        if root == 0 {
            let leaf_id = self.allocate_page()?;
            let mut leaf = LeafMut::init(self.pager.page_mut(leaf_id)?);
            leaf.insert_at(0, key, meta);
            let mut meta_page = MetaMut::new(self.pager.page_mut(0)?);
            meta_page.set_root(leaf_id);
            self.bump_entry_count(1, meta.is_tombstone())?;
            return Ok(true);
        }

        let (leaf_id, path) = self.descend_with_path(root, key)?;

        // Fast path: room in the leaf
        let (pos, count) = {
            let leaf = LeafRef::new(self.pager.page(leaf_id)?);
            match leaf.search(key) {
                Ok(_) => return Ok(false),
                Err(pos) => (pos, leaf.count()),
            }
        };

        if count < LEAF_CAPACITY {
            LeafMut::new(self.pager.page_mut(leaf_id)?).insert_at(pos, key, meta);
            self.bump_entry_count(1, meta.is_tombstone())?;
            return Ok(true);
        }

        // Split: gather, divide at the median, write both halves
        let (mut entries, next_leaf) = {
            let page = self.pager.page(leaf_id)?;
            let leaf = LeafRef::new(page);
            let entries: Vec<(IndexKey, EntryMeta)> =
                (0..leaf.count()).map(|i| (leaf.key_at(i), leaf.meta_at(i))).collect();
            (entries, leaf.next_leaf())
        };
        entries.insert(pos, (*key, meta));

        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let separator = right_entries[0].0;

        let right_id = self.allocate_page()?;
        {
            let mut right = LeafMut::init(self.pager.page_mut(right_id)?);
            right.write_entries(&right_entries);
            right.set_next_leaf(next_leaf);
        }
        {
            let mut left = LeafMut::new(self.pager.page_mut(leaf_id)?);
            left.write_entries(&entries);
            left.set_next_leaf(right_id);
        }
        self.bump_entry_count(1, meta.is_tombstone())?;
        self.insert_separator(path, separator, right_id)
    }

    /// Set the tombstone bit on an existing entry. Returns whether the key
    /// was present and newly marked.
    pub fn mark_deleted(&mut self, key: &IndexKey) -> Result<bool> {
        let root = MetaRef::new(self.pager.page(0)?).root();
        if root == 0 {
            return Ok(false);
        }
        let leaf_id = self.find_leaf(root, key)?;

        let pos = {
            let leaf = LeafRef::new(self.pager.page(leaf_id)?);
            match leaf.search(key) {
                Ok(pos) if leaf.meta_at(pos).is_tombstone() => return Ok(false),
                Ok(pos) => pos,
                Err(_) => return Ok(false),
            }
        };
        LeafMut::new(self.pager.page_mut(leaf_id)?).set_meta(pos, EntryMeta::TOMBSTONE);

        let tombstones = MetaRef::new(self.pager.page(0)?).tombstone_count();
        MetaMut::new(self.pager.page_mut(0)?).set_tombstone_count(tombstones + 1);
        Ok(true)
    }

    /// Value metadata for an exact key, if present
    pub fn point_lookup(&self, key: &IndexKey) -> Result<Option<EntryMeta>> {
        let root = MetaRef::new(self.pager.page(0)?).root();
        if root == 0 {
            return Ok(None);
        }
        let leaf_id = self.find_leaf(root, key)?;
        let leaf = LeafRef::new(self.pager.page(leaf_id)?);
        Ok(leaf.search(key).ok().map(|pos| leaf.meta_at(pos)))
    }

    /// Iterate entries with keys in `[lo, hi]`, tombstones included;
    /// temporal readers decide what a tombstone means.
    pub fn range_scan(&self, lo: IndexKey, hi: IndexKey) -> Result<RangeScan<'_>> {
        Ok(RangeScan {
            index: self,
            cursor: self.scan_start(lo, hi)?,
            cancel: None,
        })
    }

    /// Position a detached cursor at the first entry ≥ `lo`.
    ///
    /// The cursor holds no borrow; callers that own the index behind a lock
    /// guard step it with [`QuadIndex::scan_step`].
    pub fn scan_start(&self, lo: IndexKey, hi: IndexKey) -> Result<ScanCursor> {
        let root = MetaRef::new(self.pager.page(0)?).root();
        if root == 0 {
            return Ok(ScanCursor {
                leaf: 0,
                slot: 0,
                hi,
                done: true,
            });
        }
        let leaf = self.find_leaf(root, &lo)?;
        let slot = {
            let page = LeafRef::new(self.pager.page(leaf)?);
            page.search(&lo).unwrap_or_else(|pos| pos)
        };
        Ok(ScanCursor {
            leaf,
            slot,
            hi,
            done: false,
        })
    }

    /// Advance a cursor by one entry.
    ///
    /// Returns `None` past the upper bound, at the end of the leaf chain, or
    /// once `cancel` fires at a leaf transition.
    pub fn scan_step(
        &self,
        cursor: &mut ScanCursor,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<(IndexKey, EntryMeta)>> {
        if cursor.done {
            return Ok(None);
        }
        loop {
            if cursor.leaf == 0 {
                cursor.done = true;
                return Ok(None);
            }
            let leaf = LeafRef::new(self.pager.page(cursor.leaf)?);

            if cursor.slot < leaf.count() {
                let key = leaf.key_at(cursor.slot);
                if key > cursor.hi {
                    cursor.done = true;
                    return Ok(None);
                }
                let meta = leaf.meta_at(cursor.slot);
                cursor.slot += 1;
                return Ok(Some((key, meta)));
            }

            // Leaf transition: cancellation checkpoint
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    cursor.done = true;
                    return Ok(None);
                }
            }
            cursor.leaf = leaf.next_leaf();
            cursor.slot = 0;
            if cursor.leaf != 0 {
                PAGE_CACHE.touch(self.pager.file_id(), cursor.leaf);
            }
        }
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    fn find_leaf(&self, root: PageId, key: &IndexKey) -> Result<PageId> {
        let mut current = root;
        loop {
            PAGE_CACHE.touch(self.pager.file_id(), current);
            let page = self.pager.page(current)?;
            match page[0] {
                NODE_INTERNAL => {
                    let node = InternalRef::new(page);
                    current = node.child_at(node.descend_index(key));
                }
                NODE_LEAF => return Ok(current),
                other => {
                    return Err(Error::Corruption(format!(
                        "{} page {} has unknown node kind {}",
                        self.kind.file_name(),
                        current,
                        other
                    )))
                }
            }
        }
    }

    /// Like [`QuadIndex::find_leaf`], recording `(page, child index)` for
    /// every internal node on the way down (split propagation path).
    fn descend_with_path(
        &self,
        root: PageId,
        key: &IndexKey,
    ) -> Result<(PageId, Vec<(PageId, usize)>)> {
        let mut path = Vec::new();
        let mut current = root;
        loop {
            PAGE_CACHE.touch(self.pager.file_id(), current);
            let page = self.pager.page(current)?;
            match page[0] {
                NODE_INTERNAL => {
                    let node = InternalRef::new(page);
                    let idx = node.descend_index(key);
                    path.push((current, idx));
                    current = node.child_at(idx);
                }
                NODE_LEAF => return Ok((current, path)),
                other => {
                    return Err(Error::Corruption(format!(
                        "{} page {} has unknown node kind {}",
                        self.kind.file_name(),
                        current,
                        other
                    )))
                }
            }
        }
    }

    /// Propagate a split upward: hang `(separator, right)` off the parent,
    /// splitting internal nodes as needed, growing a new root at the top.
    fn insert_separator(
        &mut self,
        mut path: Vec<(PageId, usize)>,
        mut separator: IndexKey,
        mut right: PageId,
    ) -> Result<bool> {
        loop {
            let (node_id, child_idx) = match path.pop() {
                None => {
                    let old_root = MetaRef::new(self.pager.page(0)?).root();
                    let new_root = self.allocate_page()?;
                    InternalMut::init(self.pager.page_mut(new_root)?, &separator, old_root, right);
                    MetaMut::new(self.pager.page_mut(0)?).set_root(new_root);
                    return Ok(true);
                }
                Some(frame) => frame,
            };

            let count = InternalRef::new(self.pager.page(node_id)?).count();
            if count < INTERNAL_CAPACITY {
                InternalMut::new(self.pager.page_mut(node_id)?)
                    .insert_at(child_idx, &separator, right);
                return Ok(true);
            }

            // Split the internal node; the median key moves up
            let (mut keys, mut children) = {
                let node = InternalRef::new(self.pager.page(node_id)?);
                let keys: Vec<IndexKey> = (0..count).map(|i| node.key_at(i)).collect();
                let children: Vec<PageId> = (0..=count).map(|i| node.child_at(i)).collect();
                (keys, children)
            };
            keys.insert(child_idx, separator);
            children.insert(child_idx + 1, right);

            let mid = keys.len() / 2;
            let promoted = keys[mid];
            let right_keys = keys[mid + 1..].to_vec();
            let right_children = children[mid + 1..].to_vec();
            keys.truncate(mid);
            children.truncate(mid + 1);

            let new_id = self.allocate_page()?;
            InternalMut::init_empty(self.pager.page_mut(new_id)?)
                .write(&right_keys, &right_children);
            InternalMut::new(self.pager.page_mut(node_id)?).write(&keys, &children);

            separator = promoted;
            right = new_id;
        }
    }

    // ------------------------------------------------------------------
    // Meta maintenance
    // ------------------------------------------------------------------

    fn allocate_page(&mut self) -> Result<PageId> {
        let pages = MetaRef::new(self.pager.page(0)?).page_count();
        self.pager.ensure_capacity(pages + 1)?;
        MetaMut::new(self.pager.page_mut(0)?).set_page_count(pages + 1);
        Ok(pages)
    }

    fn bump_entry_count(&mut self, delta: u64, tombstone: bool) -> Result<()> {
        let meta = MetaRef::new(self.pager.page(0)?);
        let entries = meta.entry_count() + delta;
        let tombstones = meta.tombstone_count() + if tombstone { delta } else { 0 };
        let mut meta = MetaMut::new(self.pager.page_mut(0)?);
        meta.set_entry_count(entries);
        meta.set_tombstone_count(tombstones);
        Ok(())
    }
}

/// Detached scan position: `(leaf page, slot, upper bound)`
///
/// Holds no borrow of the index, so callers may store it beside a lock
/// guard and resume stepping through [`QuadIndex::scan_step`].
#[derive(Debug, Clone)]
pub struct ScanCursor {
    leaf: PageId,
    slot: usize,
    hi: IndexKey,
    done: bool,
}

impl ScanCursor {
    /// A cursor that yields nothing
    pub fn exhausted() -> Self {
        ScanCursor {
            leaf: 0,
            slot: 0,
            hi: [0; super::key::KEY_LEN],
            done: true,
        }
    }
}

/// Forward iterator over `[lo, hi]`, walking the leaf chain
///
/// Entries are yielded as 72-byte copies, so items stay valid independent of
/// the scan's progress. A cancellation token, when attached, is checked at
/// each leaf transition.
pub struct RangeScan<'a> {
    index: &'a QuadIndex,
    cursor: ScanCursor,
    cancel: Option<CancelToken>,
}

impl RangeScan<'_> {
    /// Attach a cancellation token; the scan stops cleanly at the next leaf
    /// transition after the token fires.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<(IndexKey, EntryMeta)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.index
            .scan_step(&mut self.cursor, self.cancel.as_ref())
            .transpose()
    }
}
