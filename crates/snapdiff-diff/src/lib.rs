//! Snapshot diff engine.
//!
//! Given two snapshots of the same lineage, reports which object numbers of
//! the newer one were allocated or freed since the older one was taken. The
//! answer comes from the copy-on-write metadata tree alone: any subtree
//! whose birth txg is not after the baseline is unchanged and skipped.
//!
//! # Key Types
//!
//! - [`DiffEngine`] -- validates arguments, resolves lineage, drives the walk
//! - [`CloneLineageResolver`] -- follows clone origins to find the lower bound
//! - [`DiffVisitor`] -- classifies visited blocks as free or in-use spans
//! - [`RecordEmitter`] -- merges spans into minimal contiguous records
//! - [`DiffSink`] / [`RecordReader`] -- the fixed-size record stream

pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod lineage;
pub mod stream;
pub mod visitor;

pub use config::DiffConfig;
pub use emitter::{EmitterStats, RecordEmitter};
pub use engine::{DiffEngine, DiffSummary};
pub use error::{DiffError, DiffResult};
pub use interrupt::Interrupt;
pub use lineage::CloneLineageResolver;
pub use stream::{decode_stream, DiffSink, RecordReader};
pub use visitor::{DiffVisitor, VisitStats};
