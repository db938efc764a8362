//! The diff orchestrator.

use serde::{Deserialize, Serialize};
use snapdiff_store::{BlockCache, DatasetCatalog, DatasetHold, InMemoryPool, TreeWalker};
use snapdiff_types::{DatasetId, Txg};
use tracing::{info, warn};

use crate::config::DiffConfig;
use crate::emitter::RecordEmitter;
use crate::error::{DiffError, DiffResult};
use crate::interrupt::Interrupt;
use crate::lineage::CloneLineageResolver;
use crate::stream::DiffSink;
use crate::visitor::DiffVisitor;

/// What a completed diff produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Txg below which subtrees were skipped.
    pub lower_bound: Txg,
    pub records_written: u64,
    pub bytes_written: u64,
    pub objects_in_use: u64,
    pub objects_freed: u64,
    /// Leaf dnode blocks read by the visitor.
    pub blocks_read: u64,
    pub holes_visited: u64,
}

/// Computes allocation diffs between snapshots.
///
/// The engine borrows its pool services and holds no per-diff state, so one
/// engine can run any number of diffs. Each [`diff`](DiffEngine::diff)
/// writes a stream of records to the caller's sink describing which object
/// ranges of `to` are in use and which are free, limited to the parts of
/// the tree written after `from` was taken.
pub struct DiffEngine<'a, W: TreeWalker> {
    catalog: &'a dyn DatasetCatalog,
    cache: &'a dyn BlockCache,
    walker: &'a W,
    config: DiffConfig,
    interrupt: Interrupt,
}

impl<'a> DiffEngine<'a, InMemoryPool> {
    /// An engine reading everything from one in-memory pool.
    pub fn for_pool(pool: &'a InMemoryPool) -> Self {
        Self::new(pool, pool, pool)
    }
}

impl<'a, W: TreeWalker> DiffEngine<'a, W> {
    pub fn new(
        catalog: &'a dyn DatasetCatalog,
        cache: &'a dyn BlockCache,
        walker: &'a W,
    ) -> Self {
        Self {
            catalog,
            cache,
            walker,
            config: DiffConfig::default(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_config(mut self, config: DiffConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `interrupt` as the cancellation flag. Keep a clone to cancel.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Write the diff of snapshot `to` against `from` into `sink`.
    ///
    /// With no `from`, every object slot of `to` up to its object limit is
    /// reported. Argument and lineage errors are returned before anything
    /// is written. Once records have started flowing an error stops the
    /// diff where it is: records already written stay written and form a
    /// valid prefix of the stream.
    ///
    /// A failed write to `sink` surfaces as [`DiffError::Io`]. A block that
    /// cannot be read surfaces as [`DiffError::Store`] carrying the pool's
    /// error. [`DiffError::is_io`] is true for both.
    pub fn diff(
        &self,
        to: DatasetId,
        from: Option<DatasetId>,
        sink: &mut dyn DiffSink,
    ) -> DiffResult<DiffSummary> {
        info!(to = %to, from = ?from, "starting snapshot diff");
        let result = self.run(to, from, sink);
        match &result {
            Ok(summary) => info!(
                to = %to,
                records = summary.records_written,
                bytes = summary.bytes_written,
                in_use = summary.objects_in_use,
                freed = summary.objects_freed,
                "snapshot diff complete"
            ),
            Err(e) => warn!(to = %to, from = ?from, error = %e, "snapshot diff aborted"),
        }
        result
    }

    fn run(
        &self,
        to: DatasetId,
        from: Option<DatasetId>,
        sink: &mut dyn DiffSink,
    ) -> DiffResult<DiffSummary> {
        let to_hold = DatasetHold::acquire(self.catalog, to)?;
        if !to_hold.is_snapshot {
            return Err(DiffError::InvalidArgument(format!("{to} is not a snapshot")));
        }

        // The baseline stays held until the walk is done.
        let (lower_bound, _from_hold) = match from {
            None => (Txg::GENESIS, None),
            Some(id) => {
                let from_hold = DatasetHold::acquire(self.catalog, id)?;
                let resolver =
                    CloneLineageResolver::new(self.catalog, self.config.max_lineage_depth);
                let bound = resolver.resolve(&to_hold, &from_hold)?;
                (bound, Some(from_hold))
            }
        };

        let emitter = RecordEmitter::new(sink);
        let mut visitor = DiffVisitor::new(self.cache, emitter, &self.interrupt)
            .with_object_limit(to_hold.root.object_limit);
        self.walker.traverse(
            to_hold.info(),
            lower_bound,
            self.config.traverse_flags(),
            &mut visitor,
        )?;

        let (emitter, visits) = visitor.finish();
        let emitted = emitter.finalize()?;
        Ok(DiffSummary {
            lower_bound,
            records_written: emitted.records_written,
            bytes_written: emitted.bytes_written,
            objects_in_use: emitted.objects_in_use,
            objects_freed: emitted.objects_freed,
            blocks_read: visits.blocks_read,
            holes_visited: visits.holes_visited,
        })
    }
}

impl<W: TreeWalker> std::fmt::Debug for DiffEngine<'_, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("config", &self.config)
            .field("interrupt", &self.interrupt)
            .finish()
    }
}
