//! # TesseraDB
//!
//! A persistent, embeddable quad store for RDF data with first-class
//! temporal semantics and a crash-safe write-ahead log.
//!
//! Quads are `(graph, subject, predicate, object)` tuples keyed by validity
//! intervals and transaction time. Terms are interned once into an
//! append-only dictionary; entries live in four B+Tree indexes over
//! memory-mapped 16 KiB pages; every commit goes through a fixed-record WAL
//! with hybrid checkpointing, so a killed process recovers to exactly its
//! committed state.
//!
//! # Quick Start
//!
//! ```no_run
//! use tessera::{Pattern, QuadStore, StoreConfig};
//!
//! fn main() -> tessera::Result<()> {
//!     let store = QuadStore::open("./my-data", StoreConfig::new())?;
//!
//!     // Insert quads current as of now (None = default graph)
//!     store.add_current(None, "<http://example.org/a>", "<http://example.org/p>", "\"1\"")?;
//!     store.add_current(None, "<http://example.org/a>", "<http://example.org/p>", "\"2\"")?;
//!
//!     // Pattern query over the default graph
//!     let pattern = Pattern::triple(Some("<http://example.org/a>"), None, None);
//!     for quad in store.query_current(pattern)? {
//!         println!("{}", quad?.object);
//!     }
//!
//!     // Logical deletion writes a tombstone; history stays queryable
//!     store.delete_current(None, "<http://example.org/a>", "<http://example.org/p>", "\"1\"")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! | Layer | Crate | Contents |
//! |-------|-------|----------|
//! | Engine | `tessera-engine` | [`QuadStore`], queries, [`StorePool`], pruning |
//! | Durability | `tessera-durability` | WAL records, recovery scan, checkpoints |
//! | Storage | `tessera-storage` | atom interning, pager, page cache, B+Trees |
//! | Core | `tessera-core` | ids, timestamps, patterns, errors |
//!
//! Terms must arrive in canonical lexical form: IRIs bracketed (`<…>`),
//! blank nodes as `_:label`, literals quoted with optional `@lang` or
//! `^^<datatype>`. The store does not re-canonicalize.
//!
//! Space reclamation is offline: deletion writes tombstones, and
//! [`StorePool::prune_active`] copies live data into a sibling store before
//! switching to it atomically.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use tessera_core::{
    AtomId, CancelToken, Error, Quad, QuadPattern, Result, Timestamp, Version,
};
pub use tessera_engine::{
    choose_index, DurabilityMode, GatePermit, HistoryMode, Pattern, PoolConfig, PruneOptions,
    PruneReport, PruneTransfer, QuadStore, QueryIter, StoreConfig, StoreGate, StorePool,
    StoreStatistics, TemporalQuad, TemporalScope, TermFilter, DEFAULT_GATE_CAPACITY, GATE_NAME,
};
