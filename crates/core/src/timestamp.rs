//! Millisecond-precision timestamp type
//!
//! Every quad version carries three of these: `valid_from`, `valid_to`, and
//! `tx_time`. Validity intervals are closed-open `[from, to)`.
//!
//! ## Precision and range
//!
//! Timestamps are signed milliseconds since Unix epoch (1970-01-01 UTC).
//! `i64::MAX` is reserved as the `FOREVER` sentinel marking an open-ended
//! validity interval. Comparison is plain two's-complement signed order,
//! which coincides with chronological order for non-negative times, the
//! domain index keys are defined over.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-precision instant
///
/// Represents a point in time as signed milliseconds since Unix epoch.
/// This is the canonical time representation in the store.
///
/// ## Invariants
///
/// - `FOREVER` (`i64::MAX`) marks an open validity interval, never a real
///   instant
/// - Index key encoding assumes non-negative times
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// The +∞ sentinel: an entry valid "until forever" is current
    pub const FOREVER: Timestamp = Timestamp(i64::MAX);

    /// Create a timestamp for the current moment
    ///
    /// Returns epoch (0) if the system clock reads before Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }

    /// Create a timestamp from milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since Unix epoch
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Whether this is the open-interval sentinel
    #[inline]
    pub const fn is_forever(&self) -> bool {
        self.0 == i64::MAX
    }

    /// Whether the closed-open interval `[from, to)` contains `self`
    #[inline]
    pub fn within(&self, from: Timestamp, to: Timestamp) -> bool {
        from.0 <= self.0 && self.0 < to.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_forever() {
            write!(f, "forever")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}
