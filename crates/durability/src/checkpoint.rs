//! Hybrid checkpoint trigger
//!
//! A checkpoint runs when either the WAL grows past a size threshold or
//! enough wall time has passed since the last one, whichever comes first.
//! The engine evaluates the policy after every commit.

use std::time::{Duration, Instant};

/// Default WAL size threshold: 16 MiB
pub const DEFAULT_MAX_WAL_BYTES: u64 = 16 * 1024 * 1024;
/// Default wall-time bound between checkpoints: 60 s
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Size-or-time checkpoint trigger
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    max_wal_bytes: u64,
    max_interval: Duration,
    last_checkpoint: Instant,
}

impl CheckpointPolicy {
    /// Policy with the given thresholds, starting its clock now
    pub fn new(max_wal_bytes: u64, max_interval: Duration) -> Self {
        CheckpointPolicy {
            max_wal_bytes,
            max_interval,
            last_checkpoint: Instant::now(),
        }
    }

    /// Whether either trigger has fired for a WAL of `wal_bytes`
    pub fn due(&self, wal_bytes: u64) -> bool {
        wal_bytes >= self.max_wal_bytes || self.last_checkpoint.elapsed() >= self.max_interval
    }

    /// Reset the wall-time clock after a completed checkpoint
    pub fn mark_checkpointed(&mut self) {
        self.last_checkpoint = Instant::now();
    }

    /// Configured size threshold
    pub fn max_wal_bytes(&self) -> u64 {
        self.max_wal_bytes
    }

    /// Configured time bound
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy::new(DEFAULT_MAX_WAL_BYTES, DEFAULT_MAX_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_trigger() {
        let policy = CheckpointPolicy::new(1024, Duration::from_secs(3600));
        assert!(!policy.due(1023));
        assert!(policy.due(1024));
        assert!(policy.due(10_000));
    }

    #[test]
    fn test_time_trigger() {
        let policy = CheckpointPolicy::new(u64::MAX, Duration::from_millis(0));
        // Zero interval: always due regardless of size
        assert!(policy.due(0));
    }

    #[test]
    fn test_mark_resets_clock() {
        let mut policy = CheckpointPolicy::new(u64::MAX, Duration::from_secs(3600));
        policy.mark_checkpointed();
        assert!(!policy.due(0));
    }

    #[test]
    fn test_defaults() {
        let policy = CheckpointPolicy::default();
        assert_eq!(policy.max_wal_bytes(), DEFAULT_MAX_WAL_BYTES);
        assert_eq!(policy.max_interval(), DEFAULT_MAX_INTERVAL);
    }
}
