use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snapdiff_types::{DatasetId, DirId, Txg};

use crate::blkptr::{BlockPtr, Bookmark, ObjsetRoot, TreeGeometry};
use crate::error::{StoreError, StoreResult};

/// A dataset directory as seen through a hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInfo {
    pub id: DirId,
    /// The snapshot this directory was cloned from, if it is a clone.
    pub origin: Option<DatasetId>,
}

impl DirInfo {
    pub fn is_clone(&self) -> bool {
        self.origin.is_some()
    }
}

/// A held dataset: everything the diff engine needs to know about it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: DatasetId,
    pub is_snapshot: bool,
    pub creation_txg: Txg,
    pub dir: DirInfo,
    pub root: ObjsetRoot,
}

/// Dataset metadata lookup with explicit acquire/release.
///
/// Every successful [`hold_dataset`] must be paired with exactly one
/// [`release_dataset`]. Use [`DatasetHold`] rather than calling these
/// directly.
///
/// [`hold_dataset`]: DatasetCatalog::hold_dataset
/// [`release_dataset`]: DatasetCatalog::release_dataset
/// [`DatasetHold`]: crate::hold::DatasetHold
pub trait DatasetCatalog: Send + Sync {
    /// Acquire a hold on a dataset and return its metadata.
    fn hold_dataset(&self, id: DatasetId) -> StoreResult<DatasetInfo>;

    /// Drop a hold taken with [`hold_dataset`](DatasetCatalog::hold_dataset).
    fn release_dataset(&self, id: DatasetId);
}

/// Read-through block cache.
///
/// The returned buffer is reference counted; the caller releases it by
/// dropping it.
pub trait BlockCache: Send + Sync {
    fn read_block(&self, bp: &BlockPtr) -> StoreResult<Bytes>;
}

/// Traversal control returned by a [`BlockVisitor`].
#[derive(Debug)]
pub enum Visit<E> {
    /// Keep walking, descending into this block's children.
    Continue,
    /// Keep walking, but do not descend below this block.
    SkipChildren,
    /// Stop the walk and return the error.
    Abort(E),
}

/// Ordering and prefetch options for a tree walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraverseFlags {
    /// Visit a block before its children. Post-order otherwise.
    pub pre_order: bool,
    /// Issue reads for indirect children ahead of visiting them.
    pub prefetch_metadata: bool,
}

impl TraverseFlags {
    pub const PRE_ORDER: Self = Self {
        pre_order: true,
        prefetch_metadata: false,
    };

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch_metadata = prefetch;
        self
    }
}

impl Default for TraverseFlags {
    fn default() -> Self {
        Self::PRE_ORDER
    }
}

/// Callback invoked for every block pointer a [`TreeWalker`] visits.
pub trait BlockVisitor {
    /// Error type carried by [`Visit::Abort`]. Walker I/O errors are
    /// converted into it.
    type Error: From<StoreError>;

    fn visit(
        &mut self,
        bp: &BlockPtr,
        bookmark: &Bookmark,
        geometry: &TreeGeometry,
    ) -> Visit<Self::Error>;
}

/// Walks a dataset's meta-dnode tree.
///
/// Implementations must visit pointers left to right, so that within a
/// pre-order walk the spans handed to the visitor are in increasing object
/// order. Pointers whose birth is at or before `min_txg` are skipped along
/// with their whole subtree; holes of unknown birth are always visited.
pub trait TreeWalker: Send + Sync {
    fn traverse<V: BlockVisitor>(
        &self,
        dataset: &DatasetInfo,
        min_txg: Txg,
        flags: TraverseFlags,
        visitor: &mut V,
    ) -> Result<(), V::Error>;
}
