use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use tracing::{debug, warn};

use snapdiff_types::{
    BlockAddr, DatasetId, DirId, DnodePhys, ObjectId, ObjectType, Txg, META_DNODE_OBJECT,
};

use crate::blkptr::{BlockPtr, Bookmark, ObjsetRoot, TreeGeometry};
use crate::error::{StoreError, StoreResult};
use crate::traits::{
    BlockCache, BlockVisitor, DatasetCatalog, DatasetInfo, DirInfo, TraverseFlags, TreeWalker,
    Visit,
};

/// In-memory copy-on-write pool.
///
/// Intended for tests and embedding. Head datasets accumulate object
/// allocations and frees in memory; [`sync`](InMemoryPool::sync) writes them
/// out as a new meta-dnode tree for the next txg, reusing every block whose
/// contents did not change. Snapshots and clones share blocks with the
/// dataset they were taken from, so block births carry exactly the history a
/// diff needs.
///
/// All state sits behind a `RwLock`. No lock is held while a visitor runs.
pub struct InMemoryPool {
    state: RwLock<PoolState>,
    blocks_read: AtomicU64,
    prefetched: AtomicU64,
}

struct PoolState {
    geometry: TreeGeometry,
    /// Last synced txg.
    txg: Txg,
    next_addr: u64,
    next_id: u64,
    blocks: HashMap<BlockAddr, Bytes>,
    datasets: HashMap<DatasetId, DatasetEntry>,
    dirs: HashMap<DirId, DirEntry>,
    holds: HashMap<DatasetId, usize>,
    read_faults: HashSet<BlockAddr>,
}

#[derive(Clone)]
struct DatasetEntry {
    dir: DirId,
    is_snapshot: bool,
    creation_txg: Txg,
    /// Live dnode array. Frozen for snapshots.
    dnodes: Vec<DnodePhys>,
    tree: CommittedTree,
}

struct DirEntry {
    origin: Option<DatasetId>,
}

/// Block pointers of a written tree, level by level. `levels[0]` holds the
/// leaf pointers and the last level is the root.
#[derive(Clone, Debug, Default)]
struct CommittedTree {
    levels: Vec<Vec<BlockPtr>>,
    /// Length of the dnode array the tree was written from.
    objects: u64,
}

impl CommittedTree {
    fn pointer(&self, level: usize, index: usize) -> Option<BlockPtr> {
        self.levels.get(level)?.get(index).copied()
    }

    fn root(&self, geometry: TreeGeometry) -> ObjsetRoot {
        match self.levels.last() {
            Some(top) => ObjsetRoot {
                geometry,
                nlevels: self.levels.len() as u8,
                pointers: top.clone(),
                object_limit: self.objects,
            },
            None => ObjsetRoot::empty(geometry),
        }
    }
}

impl InMemoryPool {
    /// Create an empty pool with the default tree geometry.
    pub fn new() -> Self {
        Self::with_geometry(TreeGeometry::default())
    }

    /// Create an empty pool whose datasets use `geometry`.
    ///
    /// A fan-out below 2 or a root with no pointers could never hold a
    /// growing tree; both are raised to their minimum. Block sizes are
    /// capped at 2^20 entries.
    pub fn with_geometry(mut geometry: TreeGeometry) -> Self {
        geometry.dnodes_per_block_shift = geometry.dnodes_per_block_shift.min(MAX_BLOCK_SHIFT);
        geometry.fanout_shift = geometry.fanout_shift.clamp(1, MAX_BLOCK_SHIFT);
        geometry.max_root_pointers = geometry.max_root_pointers.max(1);
        Self {
            state: RwLock::new(PoolState {
                geometry,
                txg: Txg::GENESIS,
                next_addr: 1,
                next_id: 1,
                blocks: HashMap::new(),
                datasets: HashMap::new(),
                dirs: HashMap::new(),
                holds: HashMap::new(),
                read_faults: HashSet::new(),
            }),
            blocks_read: AtomicU64::new(0),
            prefetched: AtomicU64::new(0),
        }
    }

    pub fn geometry(&self) -> TreeGeometry {
        self.state.read().expect("lock poisoned").geometry
    }

    // ---------------------------------------------------------------
    // Dataset lifecycle
    // ---------------------------------------------------------------

    /// Create an empty head dataset in a new directory.
    pub fn create_dataset(&self) -> DatasetId {
        let mut state = self.state.write().expect("lock poisoned");
        let dir = DirId(state.alloc_id());
        state.dirs.insert(dir, DirEntry { origin: None });
        let id = DatasetId(state.alloc_id());
        let creation_txg = state.txg;
        state.datasets.insert(
            id,
            DatasetEntry {
                dir,
                is_snapshot: false,
                creation_txg,
                dnodes: Vec::new(),
                tree: CommittedTree::default(),
            },
        );
        debug!(dataset = %id, dir = %dir, "created dataset");
        id
    }

    /// Allocate `object` in a head dataset. Takes effect at the next sync.
    ///
    /// `Other` types are stored under their canonical form; one that
    /// encodes as the free tag is rejected.
    pub fn allocate_object(
        &self,
        dataset: DatasetId,
        object: ObjectId,
        object_type: ObjectType,
    ) -> StoreResult<()> {
        let object_type = object_type.normalized();
        if !object_type.is_allocated() {
            return Err(StoreError::UnallocatableType(object_type.tag()));
        }
        let mut state = self.state.write().expect("lock poisoned");
        let generation = state.txg.next();
        let entry = state.head_mut(dataset)?;
        let slot = object as usize;
        if entry.dnodes.len() <= slot {
            entry.dnodes.resize(slot + 1, DnodePhys::free());
        }
        entry.dnodes[slot] = DnodePhys::allocated(object_type, generation);
        Ok(())
    }

    /// Free `object` in a head dataset. Takes effect at the next sync.
    pub fn free_object(&self, dataset: DatasetId, object: ObjectId) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let entry = state.head_mut(dataset)?;
        if let Some(slot) = entry.dnodes.get_mut(object as usize) {
            *slot = DnodePhys::free();
        }
        Ok(())
    }

    /// Write every head dataset's pending changes as the next txg.
    pub fn sync(&self) -> Txg {
        let mut state = self.state.write().expect("lock poisoned");
        let txg = state.txg.next();
        state.txg = txg;

        let mut heads: Vec<DatasetId> = state
            .datasets
            .iter()
            .filter(|(_, e)| !e.is_snapshot)
            .map(|(id, _)| *id)
            .collect();
        heads.sort();

        for id in heads {
            let Some(entry) = state.datasets.get(&id) else {
                continue;
            };
            let dnodes = entry.dnodes.clone();
            let old = entry.tree.clone();
            let tree = state.write_tree(&old, &dnodes, txg);
            if let Some(entry) = state.datasets.get_mut(&id) {
                entry.tree = tree;
            }
        }

        debug!(txg = %txg, blocks = state.blocks.len(), "pool synced");
        txg
    }

    /// Sync, then take a snapshot of a head dataset at the new txg.
    pub fn snapshot(&self, dataset: DatasetId) -> StoreResult<DatasetId> {
        {
            let mut state = self.state.write().expect("lock poisoned");
            state.head_mut(dataset)?;
        }
        let txg = self.sync();

        let mut state = self.state.write().expect("lock poisoned");
        let mut snap = state.head_mut(dataset)?.clone();
        snap.is_snapshot = true;
        snap.creation_txg = txg;
        let id = DatasetId(state.alloc_id());
        state.datasets.insert(id, snap);
        debug!(dataset = %dataset, snapshot = %id, txg = %txg, "took snapshot");
        Ok(id)
    }

    /// Create a writable clone of a snapshot in a new directory.
    pub fn clone_snapshot(&self, snapshot: DatasetId) -> StoreResult<DatasetId> {
        let mut state = self.state.write().expect("lock poisoned");
        let origin = state
            .datasets
            .get(&snapshot)
            .ok_or(StoreError::DatasetNotFound(snapshot))?;
        if !origin.is_snapshot {
            return Err(StoreError::NotASnapshot(snapshot));
        }
        let mut head = origin.clone();
        head.is_snapshot = false;
        head.creation_txg = state.txg;

        let dir = DirId(state.alloc_id());
        state.dirs.insert(
            dir,
            DirEntry {
                origin: Some(snapshot),
            },
        );
        head.dir = dir;
        let id = DatasetId(state.alloc_id());
        state.datasets.insert(id, head);
        debug!(origin = %snapshot, clone = %id, dir = %dir, "cloned snapshot");
        Ok(id)
    }

    // ---------------------------------------------------------------
    // Inspection and fault injection
    // ---------------------------------------------------------------

    /// The committed pointer at (`level`, `blkid`) in a dataset's tree.
    pub fn block_pointer(
        &self,
        dataset: DatasetId,
        level: u8,
        blkid: u64,
    ) -> StoreResult<Option<BlockPtr>> {
        let state = self.state.read().expect("lock poisoned");
        let entry = state
            .datasets
            .get(&dataset)
            .ok_or(StoreError::DatasetNotFound(dataset))?;
        Ok(entry.tree.pointer(level as usize, blkid as usize))
    }

    /// Make every subsequent read of `addr` fail.
    pub fn inject_read_fault(&self, addr: BlockAddr) {
        let mut state = self.state.write().expect("lock poisoned");
        state.read_faults.insert(addr);
    }

    pub fn clear_read_faults(&self) {
        self.state.write().expect("lock poisoned").read_faults.clear();
    }

    /// Total number of dataset holds not yet released.
    pub fn outstanding_holds(&self) -> usize {
        self.state.read().expect("lock poisoned").holds.values().sum()
    }

    /// Number of distinct blocks written so far.
    pub fn block_count(&self) -> usize {
        self.state.read().expect("lock poisoned").blocks.len()
    }

    /// Number of successful block reads served.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read.load(Ordering::Relaxed)
    }

    /// Number of indirect blocks prefetched by tree walks.
    pub fn prefetched(&self) -> u64 {
        self.prefetched.load(Ordering::Relaxed)
    }

    fn walk<V: BlockVisitor>(
        &self,
        bp: &BlockPtr,
        bookmark: Bookmark,
        geometry: &TreeGeometry,
        min_txg: Txg,
        flags: TraverseFlags,
        visitor: &mut V,
    ) -> Result<(), V::Error> {
        if bp.predates(min_txg) {
            return Ok(());
        }

        if flags.pre_order {
            match visitor.visit(bp, &bookmark, geometry) {
                Visit::Continue => {}
                Visit::SkipChildren => return Ok(()),
                Visit::Abort(e) => return Err(e),
            }
        }

        if bp.level > 0 && !bp.is_hole() {
            let children = {
                let buf = self.read_block(bp)?;
                BlockPtr::decode_indirect(&buf, bp.level)?
            };
            if flags.prefetch_metadata {
                self.prefetch(&children, min_txg);
            }
            for (index, child) in children.iter().enumerate() {
                let child_bookmark = bookmark.child(index, geometry);
                self.walk(child, child_bookmark, geometry, min_txg, flags, visitor)?;
            }
        }

        if !flags.pre_order {
            if let Visit::Abort(e) = visitor.visit(bp, &bookmark, geometry) {
                return Err(e);
            }
        }
        Ok(())
    }

    fn prefetch(&self, children: &[BlockPtr], min_txg: Txg) {
        let count = children
            .iter()
            .filter(|c| c.level > 0 && !c.is_hole() && !c.predates(min_txg))
            .count();
        self.prefetched.fetch_add(count as u64, Ordering::Relaxed);
    }
}

impl PoolState {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn head_mut(&mut self, id: DatasetId) -> StoreResult<&mut DatasetEntry> {
        let entry = self
            .datasets
            .get_mut(&id)
            .ok_or(StoreError::DatasetNotFound(id))?;
        if entry.is_snapshot {
            return Err(StoreError::ReadOnly(id));
        }
        Ok(entry)
    }

    /// Write `dnodes` as a tree for `txg`, sharing unchanged blocks with
    /// `old`.
    fn write_tree(&mut self, old: &CommittedTree, dnodes: &[DnodePhys], txg: Txg) -> CommittedTree {
        let geometry = self.geometry;
        let per_block = geometry.dnodes_per_block();
        let nleaves = dnodes.len().div_ceil(per_block);

        let mut leaves = Vec::with_capacity(nleaves);
        for blkid in 0..nleaves {
            let start = blkid * per_block;
            let end = (start + per_block).min(dnodes.len());
            let mut slots = dnodes[start..end].to_vec();
            slots.resize(per_block, DnodePhys::free());

            let old_bp = old.pointer(0, blkid);
            let bp = if slots.iter().all(|dn| !dn.is_allocated()) {
                punched_hole(old_bp, 0, txg)
            } else {
                self.write_or_reuse(old_bp, DnodePhys::encode_block(&slots), 0, txg)
            };
            leaves.push(bp);
        }

        let mut levels = vec![leaves];
        loop {
            let upper = {
                let lower = &levels[levels.len() - 1];
                if lower.len() <= geometry.max_root_pointers {
                    break;
                }
                let level = levels.len() as u8;
                let mut upper = Vec::new();
                for (index, chunk) in lower.chunks(geometry.fanout()).enumerate() {
                    let children = chunk.to_vec();
                    let bp = if children.iter().all(BlockPtr::is_hole) {
                        let birth = children
                            .iter()
                            .map(|c| c.birth)
                            .max()
                            .unwrap_or(Txg::GENESIS);
                        BlockPtr::hole(level, birth)
                    } else {
                        let old_bp = old.pointer(level as usize, index);
                        self.write_or_reuse(old_bp, BlockPtr::encode_indirect(&children), level, txg)
                    };
                    upper.push(bp);
                }
                upper
            };
            levels.push(upper);
        }

        CommittedTree {
            levels,
            objects: dnodes.len() as u64,
        }
    }

    fn write_or_reuse(
        &mut self,
        old_bp: Option<BlockPtr>,
        contents: Vec<u8>,
        level: u8,
        txg: Txg,
    ) -> BlockPtr {
        if let Some(bp) = old_bp {
            if let Some(addr) = bp.addr {
                let unchanged = self
                    .blocks
                    .get(&addr)
                    .is_some_and(|existing| existing.as_ref() == contents.as_slice());
                if bp.level == level && unchanged {
                    return bp;
                }
            }
        }
        let addr = BlockAddr(self.next_addr);
        self.next_addr += 1;
        self.blocks.insert(addr, Bytes::from(contents));
        BlockPtr::new(addr, level, txg)
    }
}

const MAX_BLOCK_SHIFT: u8 = 20;

/// Pointer for a leaf span with no allocated dnodes.
fn punched_hole(old_bp: Option<BlockPtr>, level: u8, txg: Txg) -> BlockPtr {
    match old_bp {
        Some(bp) if bp.is_hole() => bp,
        // Previously allocated: the hole is new as of this txg.
        Some(_) => BlockPtr::hole(level, txg),
        None => BlockPtr::hole(level, Txg::GENESIS),
    }
}

impl Default for InMemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetCatalog for InMemoryPool {
    fn hold_dataset(&self, id: DatasetId) -> StoreResult<DatasetInfo> {
        let mut guard = self.state.write().expect("lock poisoned");
        let state = &mut *guard;
        let entry = state
            .datasets
            .get(&id)
            .ok_or(StoreError::DatasetNotFound(id))?;
        let dir = state.dirs.get(&entry.dir).ok_or_else(|| StoreError::Corrupt {
            what: "dataset directory",
            reason: format!("{} of {id} is missing", entry.dir),
        })?;
        let info = DatasetInfo {
            id,
            is_snapshot: entry.is_snapshot,
            creation_txg: entry.creation_txg,
            dir: DirInfo {
                id: entry.dir,
                origin: dir.origin,
            },
            root: entry.tree.root(state.geometry),
        };
        *state.holds.entry(id).or_insert(0) += 1;
        Ok(info)
    }

    fn release_dataset(&self, id: DatasetId) {
        let mut state = self.state.write().expect("lock poisoned");
        match state.holds.get_mut(&id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.holds.remove(&id);
            }
            None => warn!(dataset = %id, "release of a dataset that is not held"),
        }
    }
}

impl BlockCache for InMemoryPool {
    fn read_block(&self, bp: &BlockPtr) -> StoreResult<Bytes> {
        let addr = bp.addr.ok_or(StoreError::ReadHole { level: bp.level })?;
        let state = self.state.read().expect("lock poisoned");
        if state.read_faults.contains(&addr) {
            return Err(StoreError::ReadFault(addr));
        }
        let buf = state
            .blocks
            .get(&addr)
            .cloned()
            .ok_or(StoreError::BlockNotFound(addr))?;
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        Ok(buf)
    }
}

impl TreeWalker for InMemoryPool {
    fn traverse<V: BlockVisitor>(
        &self,
        dataset: &DatasetInfo,
        min_txg: Txg,
        flags: TraverseFlags,
        visitor: &mut V,
    ) -> Result<(), V::Error> {
        let root = &dataset.root;
        let top = root.top_level();
        for (blkid, bp) in root.pointers.iter().enumerate() {
            let bookmark = Bookmark::new(META_DNODE_OBJECT, top, blkid as u64);
            self.walk(bp, bookmark, &root.geometry, min_txg, flags, visitor)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryPool")
            .field("txg", &state.txg)
            .field("dataset_count", &state.datasets.len())
            .field("block_count", &state.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hold::DatasetHold;

    /// 4 dnodes per leaf, 4 pointers per indirect, 2 root pointers.
    fn small() -> TreeGeometry {
        TreeGeometry::new(2, 2, 2)
    }

    fn populate(pool: &InMemoryPool, ds: DatasetId, objects: impl IntoIterator<Item = u64>) {
        for obj in objects {
            pool.allocate_object(ds, obj, ObjectType::PlainFile).unwrap();
        }
    }

    /// Records every visited pointer; descends everywhere.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<(Bookmark, bool)>,
        skip_leaves: bool,
    }

    impl BlockVisitor for Recorder {
        type Error = StoreError;

        fn visit(&mut self, bp: &BlockPtr, bookmark: &Bookmark, _: &TreeGeometry) -> Visit<StoreError> {
            self.seen.push((*bookmark, bp.is_hole()));
            if self.skip_leaves && bp.level == 0 {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tree construction
    // -----------------------------------------------------------------------

    #[test]
    fn tree_grows_levels_past_root_limit() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        // 12 leaves > 2 root pointers: one indirect level gives 3 > 2,
        // a second gives 1.
        populate(&pool, ds, 0..48);
        let snap = pool.snapshot(ds).unwrap();

        let info = pool.hold_dataset(snap).unwrap();
        assert_eq!(info.root.nlevels, 3);
        assert_eq!(info.root.pointers.len(), 1);
        assert_eq!(info.root.capacity(), 64);
        pool.release_dataset(snap);
    }

    #[test]
    fn indirect_blocks_hold_only_written_children() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..10);
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();
        assert_eq!(info.root.object_limit, 10);

        let top = info.root.pointers[0];
        let children = BlockPtr::decode_indirect(&pool.read_block(&top).unwrap(), 1).unwrap();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| !c.is_hole()));
        pool.release_dataset(snap);
    }

    #[test]
    fn object_limit_tracks_highest_touched_slot() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, [0, 6]);
        pool.free_object(ds, 6).unwrap();
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();
        // The freed slot still counts as touched.
        assert_eq!(info.root.object_limit, 7);
        pool.release_dataset(snap);
    }

    #[test]
    fn oversized_geometry_is_capped() {
        let pool = InMemoryPool::with_geometry(TreeGeometry::new(60, 0, 0));
        let g = pool.geometry();
        assert_eq!(g.dnodes_per_block_shift, 20);
        assert_eq!(g.fanout_shift, 1);
        assert_eq!(g.max_root_pointers, 1);
        let g = InMemoryPool::with_geometry(TreeGeometry::new(5, 40, 3)).geometry();
        assert_eq!(g.fanout_shift, 20);
    }

    #[test]
    fn empty_dataset_has_empty_root() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();
        assert!(info.root.pointers.is_empty());
        assert_eq!(info.root.nlevels, 1);
        pool.release_dataset(snap);
    }

    #[test]
    fn unchanged_blocks_are_shared_across_syncs() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..8);
        let first = pool.sync();
        let leaf0 = pool.block_pointer(ds, 0, 0).unwrap().unwrap();
        let leaf1 = pool.block_pointer(ds, 0, 1).unwrap().unwrap();
        assert_eq!(leaf0.birth, first);

        pool.free_object(ds, 5).unwrap();
        let second = pool.sync();
        assert_eq!(pool.block_pointer(ds, 0, 0).unwrap().unwrap(), leaf0);
        let rewritten = pool.block_pointer(ds, 0, 1).unwrap().unwrap();
        assert_ne!(rewritten.addr, leaf1.addr);
        assert_eq!(rewritten.birth, second);
    }

    #[test]
    fn sync_without_changes_writes_nothing() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..20);
        pool.sync();
        let before = pool.block_count();
        pool.sync();
        assert_eq!(pool.block_count(), before);
    }

    #[test]
    fn emptied_leaf_becomes_dated_hole() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..8);
        pool.sync();
        for obj in 4..8 {
            pool.free_object(ds, obj).unwrap();
        }
        let txg = pool.sync();
        let leaf = pool.block_pointer(ds, 0, 1).unwrap().unwrap();
        assert!(leaf.is_hole());
        assert_eq!(leaf.birth, txg);
    }

    #[test]
    fn never_written_leaf_is_undated_hole() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, [0, 9]);
        pool.sync();
        let leaf = pool.block_pointer(ds, 0, 1).unwrap().unwrap();
        assert!(leaf.is_hole());
        assert!(leaf.birth.is_genesis());
    }

    // -----------------------------------------------------------------------
    // Snapshots and clones
    // -----------------------------------------------------------------------

    #[test]
    fn snapshots_are_read_only() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        let snap = pool.snapshot(ds).unwrap();
        assert!(matches!(
            pool.allocate_object(snap, 1, ObjectType::PlainFile),
            Err(StoreError::ReadOnly(id)) if id == snap
        ));
        assert!(matches!(
            pool.snapshot(snap),
            Err(StoreError::ReadOnly(_))
        ));
    }

    #[test]
    fn snapshot_is_frozen_while_head_moves_on() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..4);
        let snap = pool.snapshot(ds).unwrap();
        populate(&pool, ds, 4..8);
        pool.sync();

        let frozen = pool.hold_dataset(snap).unwrap();
        let head = pool.hold_dataset(ds).unwrap();
        assert!(frozen.is_snapshot);
        assert_eq!(frozen.root.capacity(), 4);
        assert_eq!(head.root.capacity(), 8);
        assert_eq!(frozen.dir.id, head.dir.id);
        pool.release_dataset(snap);
        pool.release_dataset(ds);
    }

    #[test]
    fn clone_links_origin_and_shares_blocks() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..8);
        let snap = pool.snapshot(ds).unwrap();
        let clone = pool.clone_snapshot(snap).unwrap();

        let info = pool.hold_dataset(clone).unwrap();
        assert_eq!(info.dir.origin, Some(snap));
        assert!(info.dir.is_clone());
        pool.release_dataset(clone);

        pool.sync();
        assert_eq!(
            pool.block_pointer(clone, 0, 0).unwrap(),
            pool.block_pointer(snap, 0, 0).unwrap()
        );
    }

    #[test]
    fn other_types_are_stored_in_canonical_form() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        pool.allocate_object(ds, 1, ObjectType::Other(19)).unwrap();
        pool.allocate_object(ds, 2, ObjectType::Other(20)).unwrap();
        pool.sync();
        let bp = pool.block_pointer(ds, 0, 0).unwrap().unwrap();
        let dnodes = DnodePhys::decode_block(&pool.read_block(&bp).unwrap()).unwrap();
        assert_eq!(dnodes[1].object_type, ObjectType::PlainFile);
        assert_eq!(dnodes[2].object_type, ObjectType::Directory);
    }

    #[test]
    fn free_tag_cannot_be_allocated() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        for ty in [ObjectType::None, ObjectType::Other(0)] {
            assert!(matches!(
                pool.allocate_object(ds, 3, ty),
                Err(StoreError::UnallocatableType(0))
            ));
        }
        pool.sync();
        assert!(pool.block_pointer(ds, 0, 0).unwrap().is_none());
    }

    #[test]
    fn clone_requires_snapshot() {
        let pool = InMemoryPool::new();
        let ds = pool.create_dataset();
        assert!(matches!(
            pool.clone_snapshot(ds),
            Err(StoreError::NotASnapshot(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Holds
    // -----------------------------------------------------------------------

    #[test]
    fn holds_are_counted_and_released() {
        let pool = InMemoryPool::new();
        let ds = pool.create_dataset();
        {
            let _a = DatasetHold::acquire(&pool, ds).unwrap();
            let _b = DatasetHold::acquire(&pool, ds).unwrap();
            assert_eq!(pool.outstanding_holds(), 2);
        }
        assert_eq!(pool.outstanding_holds(), 0);
    }

    #[test]
    fn hold_of_missing_dataset_takes_nothing() {
        let pool = InMemoryPool::new();
        assert!(matches!(
            DatasetHold::acquire(&pool, DatasetId(999)),
            Err(StoreError::DatasetNotFound(_))
        ));
        assert_eq!(pool.outstanding_holds(), 0);
    }

    // -----------------------------------------------------------------------
    // Block cache
    // -----------------------------------------------------------------------

    #[test]
    fn read_block_returns_leaf_contents() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, [1]);
        pool.sync();
        let bp = pool.block_pointer(ds, 0, 0).unwrap().unwrap();
        let buf = pool.read_block(&bp).unwrap();
        let dnodes = DnodePhys::decode_block(&buf).unwrap();
        assert_eq!(dnodes.len(), 4);
        assert!(!dnodes[0].is_allocated());
        assert!(dnodes[1].is_allocated());
        assert_eq!(pool.blocks_read(), 1);
    }

    #[test]
    fn injected_fault_fails_reads() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, [0]);
        pool.sync();
        let bp = pool.block_pointer(ds, 0, 0).unwrap().unwrap();
        let addr = bp.addr.unwrap();
        pool.inject_read_fault(addr);
        assert!(matches!(pool.read_block(&bp), Err(StoreError::ReadFault(a)) if a == addr));
        pool.clear_read_faults();
        assert!(pool.read_block(&bp).is_ok());
    }

    #[test]
    fn reading_a_hole_is_an_error() {
        let pool = InMemoryPool::new();
        assert!(matches!(
            pool.read_block(&BlockPtr::hole(0, Txg::GENESIS)),
            Err(StoreError::ReadHole { level: 0 })
        ));
    }

    // -----------------------------------------------------------------------
    // Tree walking
    // -----------------------------------------------------------------------

    #[test]
    fn pre_order_visits_parents_first_left_to_right() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..12);
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();
        assert_eq!(info.root.nlevels, 2);

        let mut rec = Recorder::default();
        pool.traverse(&info, Txg::GENESIS, TraverseFlags::PRE_ORDER, &mut rec)
            .unwrap();
        let order: Vec<(u8, u64)> = rec.seen.iter().map(|(b, _)| (b.level, b.blkid)).collect();
        assert_eq!(order, vec![(1, 0), (0, 0), (0, 1), (0, 2)]);
        assert!(rec.seen.iter().all(|(_, hole)| !hole));
        pool.release_dataset(snap);
    }

    #[test]
    fn post_order_visits_children_first() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..12);
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();

        let mut rec = Recorder::default();
        let flags = TraverseFlags {
            pre_order: false,
            prefetch_metadata: false,
        };
        pool.traverse(&info, Txg::GENESIS, flags, &mut rec).unwrap();
        let last = rec.seen.last().unwrap().0;
        assert_eq!((last.level, last.blkid), (1, 0));
        pool.release_dataset(snap);
    }

    #[test]
    fn walk_skips_subtrees_born_before_min_txg() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..16);
        let base = pool.snapshot(ds).unwrap();
        pool.free_object(ds, 9).unwrap();
        let snap = pool.snapshot(ds).unwrap();

        let base_txg = pool.hold_dataset(base).unwrap().creation_txg;
        let info = pool.hold_dataset(snap).unwrap();
        let mut rec = Recorder::default();
        pool.traverse(&info, base_txg, TraverseFlags::PRE_ORDER, &mut rec)
            .unwrap();
        let visited: Vec<(u8, u64)> = rec.seen.iter().map(|(b, _)| (b.level, b.blkid)).collect();
        assert_eq!(visited, vec![(1, 0), (0, 2)]);
        pool.release_dataset(base);
        pool.release_dataset(snap);
    }

    #[test]
    fn prefetch_counts_indirect_children() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..48);
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();

        let mut rec = Recorder {
            skip_leaves: true,
            ..Default::default()
        };
        let flags = TraverseFlags::PRE_ORDER.with_prefetch(true);
        pool.traverse(&info, Txg::GENESIS, flags, &mut rec).unwrap();
        // Root indirect (level 2) has three level-1 children.
        assert_eq!(pool.prefetched(), 3);
        pool.release_dataset(snap);
    }

    #[test]
    fn walker_propagates_read_faults() {
        let pool = InMemoryPool::with_geometry(small());
        let ds = pool.create_dataset();
        populate(&pool, ds, 0..12);
        let snap = pool.snapshot(ds).unwrap();
        let info = pool.hold_dataset(snap).unwrap();
        let top = info.root.pointers[0];
        pool.inject_read_fault(top.addr.unwrap());

        let mut rec = Recorder::default();
        let err = pool
            .traverse(&info, Txg::GENESIS, TraverseFlags::PRE_ORDER, &mut rec)
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadFault(_)));
        assert_eq!(rec.seen.len(), 1);
        pool.release_dataset(snap);
    }

    #[test]
    fn debug_format() {
        let pool = InMemoryPool::new();
        let debug = format!("{pool:?}");
        assert!(debug.contains("InMemoryPool"));
        assert!(debug.contains("block_count"));
    }
}
