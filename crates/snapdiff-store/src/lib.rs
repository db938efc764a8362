//! Storage-pool collaborators for snapdiff.
//!
//! The diff engine never touches disk structures directly. It reaches the
//! pool through three seams, each a trait in this crate:
//!
//! - [`DatasetCatalog`] -- acquire/release dataset and directory metadata
//! - [`BlockCache`] -- read-through cache returning reference-counted buffers
//! - [`TreeWalker`] -- pre-order walk of a dataset's meta-dnode tree, calling
//!   a [`BlockVisitor`] for every block pointer born after a lower-bound txg
//!
//! [`InMemoryPool`] implements all three on top of a copy-on-write block map,
//! for tests and embedding.
//!
//! # Design Rules
//!
//! 1. Blocks are immutable once written; a sync writes new blocks for
//!    changed spans and shares the rest.
//! 2. Every block pointer records its birth txg; parents are rewritten
//!    whenever a child is.
//! 3. Holds are scoped: [`DatasetHold`] releases on drop.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod blkptr;
pub mod error;
pub mod hold;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use blkptr::{BlockPtr, Bookmark, ObjsetRoot, TreeGeometry, BLKPTR_SIZE};
pub use error::{StoreError, StoreResult};
pub use hold::DatasetHold;
pub use memory::InMemoryPool;
pub use traits::{
    BlockCache, BlockVisitor, DatasetCatalog, DatasetInfo, DirInfo, TraverseFlags, TreeWalker,
    Visit,
};
