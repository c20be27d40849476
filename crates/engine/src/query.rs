//! Pattern queries and temporal filtering
//!
//! A query picks one index by its bound-prefix length, range-scans it, and
//! filters entries through a temporal scope. Iterators hold the store's read
//! guard for their whole lifetime, so dropping the iterator is what releases
//! the lock; there is no manual release step.

use parking_lot::RwLockReadGuard;
use tessera_core::{CancelToken, Quad, QuadPattern, Result, Timestamp, Version};
use tessera_storage::{EntryMeta, IndexKind, KeyCodec, ScanCursor};

use crate::store::StoreInner;

/// A partially-bound query pattern over term strings
///
/// `None` positions are free. `graph: Some("")` binds the default graph;
/// `graph: None` matches quads in every graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pattern<'a> {
    /// Graph term, `Some("")` for the default graph
    pub graph: Option<&'a str>,
    /// Subject term
    pub subject: Option<&'a str>,
    /// Predicate term
    pub predicate: Option<&'a str>,
    /// Object term
    pub object: Option<&'a str>,
}

impl<'a> Pattern<'a> {
    /// The fully-unbound pattern
    pub const ANY: Pattern<'static> = Pattern {
        graph: None,
        subject: None,
        predicate: None,
        object: None,
    };

    /// Pattern over the default graph with the given triple positions
    pub fn triple(
        subject: Option<&'a str>,
        predicate: Option<&'a str>,
        object: Option<&'a str>,
    ) -> Self {
        Pattern {
            graph: Some(""),
            subject,
            predicate,
            object,
        }
    }
}

/// Temporal restriction applied to matching entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalScope {
    /// Entries current now: open validity interval, not deleted
    Current,
    /// Entries whose validity interval contains the instant
    AsOf(Timestamp),
    /// Entries whose validity interval intersects the closed range
    During(Timestamp, Timestamp),
    /// Entries recorded in the closed transaction-time window, tombstones
    /// included: the audit view, in commit order on an unbound pattern
    TxRange(Timestamp, Timestamp),
    /// Every version, tombstones included
    AllVersions,
}

/// One resolved query result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalQuad {
    /// Graph term, `None` for the default graph
    pub graph: Option<String>,
    /// Subject term
    pub subject: String,
    /// Predicate term
    pub predicate: String,
    /// Object term
    pub object: String,
    /// Start of the validity interval
    pub valid_from: Timestamp,
    /// End of the validity interval (`FOREVER` if open)
    pub valid_to: Timestamp,
    /// Transaction time of the entry
    pub tx_time: Timestamp,
    /// Whether this entry is a logical-deletion marker
    pub tombstone: bool,
}

/// Pick the index whose leading key prefix covers the most bound positions.
///
/// Ties go to GSPO, then GPOS, then GOSP; `temporal_scan` marks a pure
/// time-range scan, which only TGSPO's leading field serves.
pub fn choose_index(pattern: &QuadPattern, temporal_scan: bool) -> IndexKind {
    let mut best = IndexKind::Gspo;
    let mut best_prefix = best.bound_prefix(pattern, temporal_scan);
    for kind in &IndexKind::ALL[1..] {
        let prefix = kind.bound_prefix(pattern, temporal_scan);
        if prefix > best_prefix {
            best = *kind;
            best_prefix = prefix;
        }
    }
    best
}

/// Group accumulator for [`TemporalScope::Current`]
///
/// Versions of one quad are adjacent under every quad-major index. The quad
/// is current iff its `tx_time`-latest open-interval entry is not a
/// tombstone.
struct GroupState {
    quad: Quad,
    best: Option<(Version, bool)>,
}

impl GroupState {
    fn new(quad: Quad, version: Version, meta: EntryMeta) -> Self {
        let mut state = GroupState { quad, best: None };
        state.observe(version, meta);
        state
    }

    fn observe(&mut self, version: Version, meta: EntryMeta) {
        if !version.valid_to.is_forever() {
            return;
        }
        let later = match &self.best {
            Some((best, _)) => version.tx_time >= best.tx_time,
            None => true,
        };
        if later {
            self.best = Some((version, meta.is_tombstone()));
        }
    }

    fn finalize(self) -> Option<(Quad, Version)> {
        match self.best {
            Some((version, false)) => Some((self.quad, version)),
            _ => None,
        }
    }
}

/// Scoped query iterator
///
/// Owns the store's read guard; the guard (and with it the read lock) is
/// released when the iterator drops. The attached cancellation token, if
/// any, is honored at leaf-page transitions.
pub struct QueryIter<'a> {
    guard: RwLockReadGuard<'a, StoreInner>,
    kind: IndexKind,
    codec: KeyCodec,
    cursor: ScanCursor,
    pattern: QuadPattern,
    scope: TemporalScope,
    cancel: Option<CancelToken>,
    group: Option<GroupState>,
    finished: bool,
}

impl<'a> QueryIter<'a> {
    pub(crate) fn new(
        guard: RwLockReadGuard<'a, StoreInner>,
        pattern: QuadPattern,
        scope: TemporalScope,
        cancel: Option<CancelToken>,
    ) -> Result<Self> {
        let temporal_scan = pattern.bound_count() == 0
            && matches!(
                scope,
                TemporalScope::AsOf(_) | TemporalScope::During(_, _) | TemporalScope::TxRange(_, _)
            );
        let kind = choose_index(&pattern, temporal_scan);
        let codec = KeyCodec::new(kind);
        // Only TGSPO's leading field can turn a tx window into key bounds
        let tx_range = match scope {
            TemporalScope::TxRange(lo, hi) if kind == IndexKind::Tgspo => Some((lo, hi)),
            _ => None,
        };
        let (lo, hi) = codec.scan_bounds(&pattern, tx_range);
        let cursor = guard.index(kind).scan_start(lo, hi)?;

        Ok(QueryIter {
            guard,
            kind,
            codec,
            cursor,
            pattern,
            scope,
            cancel,
            group: None,
            finished: false,
        })
    }

    /// An iterator that yields nothing (a bound term was never interned)
    pub(crate) fn empty(guard: RwLockReadGuard<'a, StoreInner>) -> Self {
        let codec = KeyCodec::new(IndexKind::Gspo);
        QueryIter {
            guard,
            kind: IndexKind::Gspo,
            codec,
            cursor: ScanCursor::exhausted(),
            pattern: QuadPattern::ANY,
            scope: TemporalScope::AllVersions,
            cancel: None,
            group: None,
            finished: true,
        }
    }

    /// Which index this query scans
    pub fn index_kind(&self) -> IndexKind {
        self.kind
    }

    fn resolve(&self, quad: Quad, version: Version, tombstone: bool) -> Result<TemporalQuad> {
        let graph = if quad.graph.is_default_graph() {
            None
        } else {
            Some(self.guard.atoms.resolve(quad.graph)?)
        };
        Ok(TemporalQuad {
            graph,
            subject: self.guard.atoms.resolve(quad.subject)?,
            predicate: self.guard.atoms.resolve(quad.predicate)?,
            object: self.guard.atoms.resolve(quad.object)?,
            valid_from: version.valid_from,
            valid_to: version.valid_to,
            tx_time: version.tx_time,
            tombstone,
        })
    }

    /// Whether the entry passes the non-grouping temporal scopes
    fn scope_admits(&self, version: &Version, meta: &EntryMeta) -> bool {
        match self.scope {
            TemporalScope::Current => unreachable!("grouped path"),
            TemporalScope::AsOf(instant) => !meta.is_tombstone() && version.contains(instant),
            TemporalScope::During(lo, hi) => !meta.is_tombstone() && version.intersects(lo, hi),
            TemporalScope::TxRange(lo, hi) => lo <= version.tx_time && version.tx_time <= hi,
            TemporalScope::AllVersions => true,
        }
    }
}

impl Iterator for QueryIter<'_> {
    type Item = Result<TemporalQuad>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let step = self
                .guard
                .index(self.kind)
                .scan_step(&mut self.cursor, self.cancel.as_ref());
            let entry = match step {
                Ok(entry) => entry,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            let Some((key, meta)) = entry else {
                self.finished = true;
                // Flush the trailing group in Current scope
                if let Some(state) = self.group.take() {
                    if let Some((quad, version)) = state.finalize() {
                        return Some(self.resolve(quad, version, false));
                    }
                }
                return None;
            };

            let (quad, version) = self.codec.decode(&key);
            if !self.pattern.matches(&quad) {
                continue;
            }

            if self.scope == TemporalScope::Current {
                match self.group.as_mut() {
                    Some(state) if state.quad == quad => {
                        state.observe(version, meta);
                        continue;
                    }
                    Some(state) => {
                        let done = std::mem::replace(state, GroupState::new(quad, version, meta));
                        if let Some((quad, version)) = done.finalize() {
                            return Some(self.resolve(quad, version, false));
                        }
                        continue;
                    }
                    None => {
                        self.group = Some(GroupState::new(quad, version, meta));
                        continue;
                    }
                }
            }

            if self.scope_admits(&version, &meta) {
                return Some(self.resolve(quad, version, meta.is_tombstone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::AtomId;

    fn pattern(g: bool, s: bool, p: bool, o: bool) -> QuadPattern {
        QuadPattern {
            graph: g.then_some(AtomId(8)),
            subject: s.then_some(AtomId(16)),
            predicate: p.then_some(AtomId(24)),
            object: o.then_some(AtomId(32)),
        }
    }

    #[test]
    fn test_fully_bound_prefers_gspo() {
        assert_eq!(choose_index(&pattern(true, true, true, true), false), IndexKind::Gspo);
    }

    #[test]
    fn test_predicate_bound_prefers_gpos() {
        // G and P bound, S free: GPOS covers G,P while GSPO stops at G
        assert_eq!(choose_index(&pattern(true, false, true, false), false), IndexKind::Gpos);
        // P and O bound too
        assert_eq!(choose_index(&pattern(true, false, true, true), false), IndexKind::Gpos);
    }

    #[test]
    fn test_object_bound_prefers_gosp() {
        assert_eq!(choose_index(&pattern(true, false, false, true), false), IndexKind::Gosp);
    }

    #[test]
    fn test_unbound_defaults_to_gspo() {
        assert_eq!(choose_index(&pattern(false, false, false, false), false), IndexKind::Gspo);
        // S bound without G: no index leads with S, tie at zero → GSPO
        assert_eq!(choose_index(&pattern(false, true, false, false), false), IndexKind::Gspo);
    }

    #[test]
    fn test_pure_temporal_scan_prefers_tgspo() {
        assert_eq!(choose_index(&pattern(false, false, false, false), true), IndexKind::Tgspo);
    }

    #[test]
    fn test_group_state_latest_wins() {
        let quad = Quad::new(None, AtomId(8), AtomId(16), AtomId(24));
        let v1 = Version::current(Timestamp::from_millis(100));
        let v2 = Version::current(Timestamp::from_millis(200));

        // Insert then delete: the later tombstone suppresses the quad
        let mut state = GroupState::new(quad, v1, EntryMeta::LIVE);
        state.observe(v2, EntryMeta::TOMBSTONE);
        assert!(state.finalize().is_none());

        // Delete then re-insert: the quad is current again
        let v3 = Version::current(Timestamp::from_millis(300));
        let mut state = GroupState::new(quad, v1, EntryMeta::LIVE);
        state.observe(v2, EntryMeta::TOMBSTONE);
        state.observe(v3, EntryMeta::LIVE);
        assert_eq!(state.finalize(), Some((quad, v3)));
    }

    #[test]
    fn test_group_state_ignores_closed_intervals() {
        let quad = Quad::new(None, AtomId(8), AtomId(16), AtomId(24));
        let closed = Version {
            valid_from: Timestamp::from_millis(100),
            valid_to: Timestamp::from_millis(200),
            tx_time: Timestamp::from_millis(100),
        };
        let state = GroupState::new(quad, closed, EntryMeta::LIVE);
        assert!(state.finalize().is_none());
    }
}
