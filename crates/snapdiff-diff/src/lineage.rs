//! Clone lineage resolution.
//!
//! A diff from `from` to `to` is only meaningful when `from` is an older
//! point in `to`'s own history. That history may cross clone boundaries:
//! a clone's directory records the snapshot it was cloned from, and that
//! snapshot's directory may itself be a clone. The resolver follows those
//! links from `to` until it reaches `from`'s directory.

use std::collections::HashSet;

use snapdiff_store::{DatasetCatalog, DatasetHold, DatasetInfo};
use snapdiff_types::Txg;
use tracing::debug;

use crate::error::{DiffError, DiffResult};

/// Validates that `from` is an ancestor of `to` and yields the lower bound
/// for the tree walk.
pub struct CloneLineageResolver<'a> {
    catalog: &'a dyn DatasetCatalog,
    max_depth: usize,
}

impl<'a> CloneLineageResolver<'a> {
    pub fn new(catalog: &'a dyn DatasetCatalog, max_depth: usize) -> Self {
        Self { catalog, max_depth }
    }

    /// Resolve the lower-bound txg for a diff from `from` to `to`.
    ///
    /// Origin snapshots are held only for the hop that inspects them.
    pub fn resolve(&self, to: &DatasetInfo, from: &DatasetInfo) -> DiffResult<Txg> {
        if !to.is_snapshot {
            return Err(DiffError::InvalidArgument(format!(
                "{} is not a snapshot",
                to.id
            )));
        }
        if !from.is_snapshot {
            return Err(DiffError::InvalidArgument(format!(
                "{} is not a snapshot",
                from.id
            )));
        }
        if from.creation_txg >= to.creation_txg {
            return Err(DiffError::CrossDevice(format!(
                "{} (created {}) is not older than {} (created {})",
                from.id, from.creation_txg, to.id, to.creation_txg
            )));
        }

        let mut dir = to.dir.clone();
        // Creation txg of the origin snapshot that led into `dir`.
        let mut entered_at: Option<Txg> = None;
        let mut seen = HashSet::new();
        let mut hops = 0;

        loop {
            if !seen.insert(dir.id) {
                return Err(DiffError::LineageCycle {
                    dataset: to.id,
                    hops,
                });
            }

            if dir.id == from.dir.id {
                if let Some(origin_txg) = entered_at {
                    if from.creation_txg > origin_txg {
                        return Err(DiffError::CrossDevice(format!(
                            "{} was taken after the clone origin of {}",
                            from.id, to.id
                        )));
                    }
                }
                debug!(to = %to.id, from = %from.id, hops, "lineage resolved");
                return Ok(from.creation_txg);
            }

            let Some(origin) = dir.origin else {
                return Err(DiffError::CrossDevice(format!(
                    "{} is not in the lineage of {}",
                    from.id, to.id
                )));
            };
            if hops >= self.max_depth {
                return Err(DiffError::LineageCycle {
                    dataset: to.id,
                    hops,
                });
            }
            hops += 1;

            let hold = DatasetHold::acquire(self.catalog, origin)?;
            debug!(
                dir = %dir.id,
                origin = %origin,
                origin_dir = %hold.dir.id,
                created = %hold.creation_txg,
                "followed clone origin"
            );
            entered_at = Some(hold.creation_txg);
            dir = hold.dir.clone();
        }
    }
}
