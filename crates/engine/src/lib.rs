//! Engine layer for TesseraDB
//!
//! Orchestrates the storage and durability substrates into the public quad
//! store:
//!
//! - [`QuadStore`]: single-writer / multi-reader temporal quad store with
//!   WAL-backed commits, batched write sessions, and hybrid checkpointing
//! - [`Pattern`] / [`TemporalScope`] / [`QueryIter`]: pattern queries with
//!   index selection and guard-scoped iteration
//! - [`StorePool`]: named sibling stores with an atomic active pointer
//! - [`StoreGate`]: cross-process bound on concurrently open stores
//! - [`PruneTransfer`]: the offline prune-and-switch space reclamation

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod gate;
mod pool;
mod prune;
mod query;
mod stats;
mod store;

pub use config::{DurabilityMode, PoolConfig, StoreConfig};
pub use gate::{GatePermit, StoreGate, DEFAULT_GATE_CAPACITY, GATE_NAME};
pub use pool::{StorePool, DEFAULT_ACTIVE, POOL_META_FILE};
pub use prune::{HistoryMode, PruneOptions, PruneReport, PruneTransfer, TermFilter};
pub use query::{choose_index, Pattern, QueryIter, TemporalQuad, TemporalScope};
pub use stats::StoreStatistics;
pub use store::QuadStore;
