//! Clock-replacement page cache
//!
//! A fixed-size table tracking hot pages across every open store in the
//! process. Pages live in memory-mapped files, so the cache never owns page
//! data; a slot records only that a page is hot. Eviction therefore drops
//! bookkeeping, never bytes: the page stays reachable through its id.
//!
//! Lookup is a bounded linear probe from the key's home slot. Replacement is
//! the clock (second-chance) algorithm: a rotating hand clears referenced
//! bits until it finds a victim.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::PageId;

/// Default number of cache slots
pub const DEFAULT_CACHE_SLOTS: usize = 10_000;

/// Slots examined per lookup before declaring a miss
const PROBE_WINDOW: usize = 16;

/// Process-wide page cache shared across stores
pub static PAGE_CACHE: Lazy<PageCache> = Lazy::new(|| PageCache::new(DEFAULT_CACHE_SLOTS));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotKey {
    file_id: u32,
    page_id: PageId,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: Option<SlotKey>,
    referenced: bool,
    access_count: u32,
}

const EMPTY_SLOT: Slot = Slot {
    key: None,
    referenced: false,
    access_count: 0,
};

/// Cache access statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found their page
    pub hits: u64,
    /// Lookups that did not
    pub misses: u64,
    /// Slots reclaimed by the clock hand
    pub evictions: u64,
}

struct CacheInner {
    slots: Vec<Slot>,
    hand: usize,
    stats: CacheStats,
}

/// Fixed-slot page cache with clock replacement
pub struct PageCache {
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Create a cache with the given slot count
    pub fn new(slots: usize) -> Self {
        PageCache {
            inner: Mutex::new(CacheInner {
                slots: vec![EMPTY_SLOT; slots.max(PROBE_WINDOW)],
                hand: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Record an access to `(file_id, page_id)`.
    ///
    /// Returns `true` on a hit. On a miss the page is admitted, evicting a
    /// victim when the probe window is full.
    pub fn touch(&self, file_id: u32, page_id: PageId) -> bool {
        let key = SlotKey { file_id, page_id };
        let mut inner = self.inner.lock();
        let len = inner.slots.len();
        let home = Self::home_slot(key, len);

        // Probe for an existing entry
        for i in 0..PROBE_WINDOW {
            let idx = (home + i) % len;
            let slot = &mut inner.slots[idx];
            if slot.key == Some(key) {
                slot.referenced = true;
                slot.access_count = slot.access_count.saturating_add(1);
                inner.stats.hits += 1;
                return true;
            }
        }

        inner.stats.misses += 1;

        // Admit into an empty slot in the window if there is one
        for i in 0..PROBE_WINDOW {
            let idx = (home + i) % len;
            if inner.slots[idx].key.is_none() {
                inner.slots[idx] = Slot {
                    key: Some(key),
                    referenced: true,
                    access_count: 1,
                };
                return false;
            }
        }

        // Window full: run the clock hand for a victim
        let victim = Self::advance_hand(&mut inner);
        inner.stats.evictions += 1;
        inner.slots[victim] = Slot {
            key: Some(key),
            referenced: true,
            access_count: 1,
        };
        false
    }

    /// Drop every slot belonging to `file_id` (store close or clear)
    pub fn invalidate_file(&self, file_id: u32) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            if matches!(slot.key, Some(k) if k.file_id == file_id) {
                *slot = EMPTY_SLOT;
            }
        }
    }

    /// Snapshot of hit/miss/eviction counters
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Number of occupied slots
    pub fn resident(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.key.is_some())
            .count()
    }

    fn home_slot(key: SlotKey, len: usize) -> usize {
        // FNV-1a over the 12-byte key
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in key
            .file_id
            .to_le_bytes()
            .into_iter()
            .chain(key.page_id.to_le_bytes())
        {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % len as u64) as usize
    }

    /// Second chance: clear referenced bits until an unreferenced occupied
    /// slot comes under the hand.
    fn advance_hand(inner: &mut CacheInner) -> usize {
        let len = inner.slots.len();
        loop {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % len;

            let slot = &mut inner.slots[idx];
            match slot.key {
                None => return idx,
                Some(_) if slot.referenced => slot.referenced = false,
                Some(_) => return idx,
            }
        }
    }
}
