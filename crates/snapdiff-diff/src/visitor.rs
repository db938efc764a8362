//! The tree-walk callback that turns meta-dnode blocks into diff reports.
//!
//! Only pointers in the meta-dnode's own tree matter. For each one:
//!
//! - a hole means nothing is allocated anywhere in its span, so the whole
//!   span is reported free;
//! - an allocated level-0 block is read and every dnode slot is reported
//!   free or in use, then the walk is told not to descend further;
//! - an allocated indirect block reports nothing; its children will be
//!   visited next.
//!
//! Reports never reach past the dataset's object limit, so unused tree
//! capacity stays out of the stream.

use snapdiff_store::{
    BlockCache, BlockPtr, BlockVisitor, Bookmark, StoreError, TreeGeometry, Visit,
};
use snapdiff_types::{DnodePhys, RecordKind, META_DNODE_OBJECT};

use crate::emitter::RecordEmitter;
use crate::error::{DiffError, DiffResult};
use crate::interrupt::Interrupt;

/// Counters kept by a [`DiffVisitor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisitStats {
    pub blocks_read: u64,
    pub holes_visited: u64,
}

/// [`BlockVisitor`] feeding a [`RecordEmitter`].
pub struct DiffVisitor<'a, 's> {
    cache: &'a dyn BlockCache,
    emitter: RecordEmitter<'s>,
    interrupt: &'a Interrupt,
    object_limit: u64,
    stats: VisitStats,
}

impl<'a, 's> DiffVisitor<'a, 's> {
    pub fn new(
        cache: &'a dyn BlockCache,
        emitter: RecordEmitter<'s>,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            cache,
            emitter,
            interrupt,
            object_limit: u64::MAX,
            stats: VisitStats::default(),
        }
    }

    /// Stop reporting at object `limit` (exclusive).
    pub fn with_object_limit(mut self, limit: u64) -> Self {
        self.object_limit = limit;
        self
    }

    pub fn stats(&self) -> VisitStats {
        self.stats
    }

    /// Hand back the emitter once the walk has completed.
    pub fn finish(self) -> (RecordEmitter<'s>, VisitStats) {
        (self.emitter, self.stats)
    }

    fn visit_hole(&mut self, bookmark: &Bookmark, geometry: &TreeGeometry) -> DiffResult<()> {
        let (first, last) = geometry.span(bookmark);
        self.stats.holes_visited += 1;
        if first >= self.object_limit {
            return Ok(());
        }
        let last = last.min(self.object_limit - 1);
        self.emitter.report(first, last, RecordKind::Free)?;
        Ok(())
    }

    fn visit_leaf(
        &mut self,
        bp: &BlockPtr,
        bookmark: &Bookmark,
        geometry: &TreeGeometry,
    ) -> DiffResult<()> {
        let dnodes = {
            let buf = self.cache.read_block(bp)?;
            self.stats.blocks_read += 1;
            DnodePhys::decode_block(&buf).map_err(StoreError::from)?
        };
        if dnodes.len() != geometry.dnodes_per_block() {
            return Err(StoreError::Corrupt {
                what: "dnode block",
                reason: format!(
                    "block {} holds {} dnodes, expected {}",
                    bookmark.blkid,
                    dnodes.len(),
                    geometry.dnodes_per_block()
                ),
            }
            .into());
        }

        let (first, _) = geometry.span(bookmark);
        for (slot, dnode) in dnodes.iter().enumerate() {
            let object = first.saturating_add(slot as u64);
            if object >= self.object_limit {
                break;
            }
            let kind = if dnode.is_allocated() {
                RecordKind::InUse
            } else {
                RecordKind::Free
            };
            self.emitter.report(object, object, kind)?;
        }
        Ok(())
    }
}

impl BlockVisitor for DiffVisitor<'_, '_> {
    type Error = DiffError;

    fn visit(
        &mut self,
        bp: &BlockPtr,
        bookmark: &Bookmark,
        geometry: &TreeGeometry,
    ) -> Visit<DiffError> {
        if self.interrupt.is_triggered() {
            return Visit::Abort(DiffError::Interrupted);
        }
        if bookmark.object != META_DNODE_OBJECT {
            return Visit::Continue;
        }

        if bp.is_hole() {
            return match self.visit_hole(bookmark, geometry) {
                Ok(()) => Visit::Continue,
                Err(e) => Visit::Abort(e),
            };
        }
        if bookmark.level == 0 {
            // Per-object data blocks hang below this level; a metadata diff
            // never needs them.
            return match self.visit_leaf(bp, bookmark, geometry) {
                Ok(()) => Visit::SkipChildren,
                Err(e) => Visit::Abort(e),
            };
        }
        Visit::Continue
    }
}
