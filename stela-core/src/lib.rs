//! # Stela Core
//!
//! Core types shared by the stela knowledge-graph engine.
//!
//! This crate provides:
//! - [`ValueId`]: the 64-bit tagged encoding of every RDF term
//! - [`IdTable`]: row-major result tables tracked against a memory budget
//! - [`LocalVocab`]: per-result bags of strings not in the global vocabulary
//! - [`DeltaTriples`]: the in-memory insert/delete overlay
//! - [`BoundedQueue`], [`CancellationHandle`]: the concurrency primitives the
//!   engine is built from
//!
//! ## Design Principles
//!
//! 1. **No event loop**: parallel OS threads coordinated by mutex/condvar;
//!    cooperative suspension points are explicit.
//! 2. **Fixed-width ids everywhere**: all query-time data flows as `ValueId`
//!    columns; strings are only materialised at the result boundary.
//! 3. **Recoverable resource errors**: exceeding the memory budget aborts the
//!    query, never the process.

pub mod bounded_queue;
pub mod cancellation;
pub mod config;
pub mod delta;
pub mod error;
pub mod id_table;
pub mod local_vocab;
pub mod ranges;
pub mod value_id;

pub use bounded_queue::BoundedQueue;
pub use cancellation::CancellationHandle;
pub use config::EngineConfig;
pub use delta::{DeltaTriples, DeltaTriplesCount, DeltaTriplesManager, Triple};
pub use error::{Error, Result};
pub use id_table::{IdTable, MemoryBudget};
pub use local_vocab::LocalVocab;
pub use ranges::{ranges_for_id, CompOp};
pub use value_id::{Datatype, ValueId};
