//! Core types for TesseraDB
//!
//! This crate defines the vocabulary shared by every layer of the store:
//!
//! - [`AtomId`]: interned RDF term identifier (a byte offset into the atom
//!   data file)
//! - [`Timestamp`]: signed millisecond instant with a `FOREVER` sentinel
//! - [`Quad`] / [`Version`]: a graph-subject-predicate-object tuple plus its
//!   temporal metadata
//! - [`QuadPattern`]: a partially-bound quad used for index selection
//! - [`CancelToken`]: cooperative cancellation for long scans
//! - [`Error`] / [`Result`]: the unified error type for all Tessera APIs
//!
//! Nothing in this crate touches the disk. The storage, durability, and
//! engine crates build on these definitions.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod timestamp;
mod types;

pub use error::{Error, Result};
pub use timestamp::Timestamp;
pub use types::{AtomId, CancelToken, Quad, QuadPattern, Version};
