//! Store and pool configuration

use std::path::PathBuf;
use std::time::Duration;
use tessera_durability::{DEFAULT_MAX_INTERVAL, DEFAULT_MAX_WAL_BYTES};

/// fsync policy for single-quad commits
///
/// Batched write sessions always sync once at `commit_batch`, whatever the
/// mode; the mode governs the one-record write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every commit, maximum durability
    Strict,
    /// Defer fsync to the next batch commit, checkpoint, or close
    Batched,
}

/// Configuration for one quad store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// fsync policy for single-quad commits
    pub durability: DurabilityMode,
    /// WAL size that triggers a checkpoint
    pub max_wal_bytes: u64,
    /// Wall time between checkpoints
    pub checkpoint_interval: Duration,
}

impl StoreConfig {
    /// Production defaults: strict durability, 16 MiB / 60 s checkpointing
    pub fn new() -> Self {
        StoreConfig {
            durability: DurabilityMode::Strict,
            max_wal_bytes: DEFAULT_MAX_WAL_BYTES,
            checkpoint_interval: DEFAULT_MAX_INTERVAL,
        }
    }

    /// Small thresholds for tests: checkpoints trigger quickly
    pub fn for_testing() -> Self {
        StoreConfig {
            durability: DurabilityMode::Strict,
            max_wal_bytes: 64 * 1024,
            checkpoint_interval: Duration::from_secs(3600),
        }
    }

    /// Set the durability mode
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the WAL size checkpoint threshold
    pub fn with_max_wal_bytes(mut self, bytes: u64) -> Self {
        self.max_wal_bytes = bytes;
        self
    }

    /// Set the wall-time checkpoint bound
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::new()
    }
}

/// Configuration for a store pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Gate capacity requested when this process creates the gate; later
    /// openers inherit the creator's capacity
    pub gate_capacity: usize,
    /// How long a store open waits for a gate slot before
    /// `CapacityExhausted`
    pub gate_timeout: Duration,
    /// Override the gate directory (tests); `None` uses the system-wide
    /// well-known location
    pub gate_dir: Option<PathBuf>,
}

impl PoolConfig {
    /// Defaults: capacity 4, 30 s acquisition timeout, shared gate
    pub fn new() -> Self {
        PoolConfig {
            gate_capacity: crate::gate::DEFAULT_GATE_CAPACITY,
            gate_timeout: Duration::from_secs(30),
            gate_dir: None,
        }
    }

    /// Isolated gate in `dir` with the given capacity and a short timeout,
    /// the shape every test wants
    pub fn for_testing(dir: PathBuf, capacity: usize) -> Self {
        PoolConfig {
            gate_capacity: capacity,
            gate_timeout: Duration::from_millis(250),
            gate_dir: Some(dir),
        }
    }

    /// Set the gate acquisition timeout
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new();
        assert_eq!(config.durability, DurabilityMode::Strict);
        assert_eq!(config.max_wal_bytes, DEFAULT_MAX_WAL_BYTES);
        assert_eq!(config.checkpoint_interval, DEFAULT_MAX_INTERVAL);
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::new()
            .with_durability(DurabilityMode::Batched)
            .with_max_wal_bytes(1024)
            .with_checkpoint_interval(Duration::from_secs(5));
        assert_eq!(config.durability, DurabilityMode::Batched);
        assert_eq!(config.max_wal_bytes, 1024);
        assert_eq!(config.checkpoint_interval, Duration::from_secs(5));
    }
}
