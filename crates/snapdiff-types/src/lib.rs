//! Foundation types for snapdiff.
//!
//! This crate provides the identifiers, on-disk dnode layout and diff record
//! wire format shared by the store and diff crates. Every other snapdiff
//! crate depends on `snapdiff-types`.
//!
//! # Key Types
//!
//! - [`Txg`] -- Transaction group number (the pool's logical clock)
//! - [`ObjectId`] -- Dnode number within a dataset
//! - [`DatasetId`] / [`DirId`] -- Dataset and dataset-directory identifiers
//! - [`BlockAddr`] -- Location of an allocated block
//! - [`DnodePhys`] / [`ObjectType`] -- On-disk dnode slot
//! - [`DiffRecord`] / [`RecordKind`] -- One run-length-encoded diff range

pub mod dnode;
pub mod error;
pub mod ids;
pub mod record;
pub mod txg;

pub use dnode::{DnodePhys, ObjectType, DNODE_SIZE};
pub use error::TypeError;
pub use ids::{BlockAddr, DatasetId, DirId, ObjectId, META_DNODE_OBJECT};
pub use record::{DiffRecord, RecordKind, KIND_NONE, RECORD_SIZE};
pub use txg::Txg;
