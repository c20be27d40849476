//! Quad-store value types
//!
//! [`AtomId`] is the interned form of an RDF term: the byte offset of the
//! term's record in the atom data file. Offsets are stable for the life of a
//! store, so an id resolved once stays valid. Id 0 is the default-graph /
//! unbound sentinel; the data file starts with a header, so no real record
//! ever sits at offset 0.

use crate::timestamp::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Interned RDF term identifier
///
/// The value is the term record's byte offset in `atoms.data`, which
/// uniquely identifies the term for the store's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(pub u64);

impl AtomId {
    /// The default-graph / unbound sentinel
    pub const DEFAULT_GRAPH: AtomId = AtomId(0);

    /// Raw byte-offset value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the default-graph sentinel
    #[inline]
    pub const fn is_default_graph(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for AtomId {
    fn from(raw: u64) -> Self {
        AtomId(raw)
    }
}

/// A graph-subject-predicate-object tuple of interned terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    /// Graph term (default-graph sentinel when unnamed)
    pub graph: AtomId,
    /// Subject term
    pub subject: AtomId,
    /// Predicate term
    pub predicate: AtomId,
    /// Object term
    pub object: AtomId,
}

impl Quad {
    /// Construct a quad; `graph = None` means the default graph.
    pub fn new(graph: Option<AtomId>, subject: AtomId, predicate: AtomId, object: AtomId) -> Self {
        Quad {
            graph: graph.unwrap_or(AtomId::DEFAULT_GRAPH),
            subject,
            predicate,
            object,
        }
    }
}

/// Temporal metadata attached to one index entry
///
/// The same logical quad may appear under many versions; each version is one
/// entry in every index. An entry with `valid_to == FOREVER` and no
/// tombstone is *current*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Start of the validity interval (inclusive)
    pub valid_from: Timestamp,
    /// End of the validity interval (exclusive); `FOREVER` if open
    pub valid_to: Timestamp,
    /// Transaction time the entry was written
    pub tx_time: Timestamp,
}

impl Version {
    /// A version that is current as of `now`
    pub fn current(now: Timestamp) -> Self {
        Version {
            valid_from: now,
            valid_to: Timestamp::FOREVER,
            tx_time: now,
        }
    }

    /// Whether the validity interval contains `instant`
    #[inline]
    pub fn contains(&self, instant: Timestamp) -> bool {
        instant.within(self.valid_from, self.valid_to)
    }

    /// Whether the validity interval intersects `[lo, hi]`
    #[inline]
    pub fn intersects(&self, lo: Timestamp, hi: Timestamp) -> bool {
        self.valid_from <= hi && lo < self.valid_to
    }
}

/// A partially-bound quad
///
/// `None` positions are free variables. The engine picks the index whose
/// leading key prefix covers the most bound positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadPattern {
    /// Bound graph, or any graph
    pub graph: Option<AtomId>,
    /// Bound subject, or any subject
    pub subject: Option<AtomId>,
    /// Bound predicate, or any predicate
    pub predicate: Option<AtomId>,
    /// Bound object, or any object
    pub object: Option<AtomId>,
}

impl QuadPattern {
    /// The fully-unbound pattern (matches every quad)
    pub const ANY: QuadPattern = QuadPattern {
        graph: None,
        subject: None,
        predicate: None,
        object: None,
    };

    /// Whether a quad matches every bound position
    pub fn matches(&self, quad: &Quad) -> bool {
        self.graph.map_or(true, |g| g == quad.graph)
            && self.subject.map_or(true, |s| s == quad.subject)
            && self.predicate.map_or(true, |p| p == quad.predicate)
            && self.object.map_or(true, |o| o == quad.object)
    }

    /// Number of bound positions
    pub fn bound_count(&self) -> usize {
        [
            self.graph.is_some(),
            self.subject.is_some(),
            self.predicate.is_some(),
            self.object.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }
}

/// Cooperative cancellation signal for long-running scans
///
/// Query iterators check the token between leaf-page transitions and stop
/// yielding once it is set. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, unset token
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Signal cancellation to every holder of this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_graph_sentinel() {
        assert!(AtomId::DEFAULT_GRAPH.is_default_graph());
        assert!(!AtomId(8).is_default_graph());
        assert_eq!(Quad::new(None, AtomId(8), AtomId(16), AtomId(24)).graph, AtomId::DEFAULT_GRAPH);
    }

    #[test]
    fn test_pattern_matching() {
        let quad = Quad::new(None, AtomId(8), AtomId(16), AtomId(24));

        assert!(QuadPattern::ANY.matches(&quad));

        let bound = QuadPattern {
            graph: Some(AtomId::DEFAULT_GRAPH),
            subject: Some(AtomId(8)),
            predicate: None,
            object: None,
        };
        assert!(bound.matches(&quad));
        assert_eq!(bound.bound_count(), 2);

        let miss = QuadPattern {
            object: Some(AtomId(99)),
            ..QuadPattern::ANY
        };
        assert!(!miss.matches(&quad));
    }

    #[test]
    fn test_version_intervals() {
        let v = Version {
            valid_from: Timestamp::from_millis(100),
            valid_to: Timestamp::from_millis(200),
            tx_time: Timestamp::from_millis(100),
        };

        assert!(v.contains(Timestamp::from_millis(150)));
        assert!(!v.contains(Timestamp::from_millis(200)));

        assert!(v.intersects(Timestamp::from_millis(180), Timestamp::from_millis(220)));
        assert!(v.intersects(Timestamp::from_millis(0), Timestamp::from_millis(100)));
        assert!(!v.intersects(Timestamp::from_millis(200), Timestamp::from_millis(300)));
    }

    #[test]
    fn test_cancel_token_shared_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
