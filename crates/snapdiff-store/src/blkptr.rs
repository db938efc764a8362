//! Block pointers, bookmarks and meta-dnode tree geometry.
//!
//! Indirect blocks are packed arrays of encoded block pointers:
//!
//! ```text
//! [8 bytes: block address (little-endian u64), 0 = hole]
//! [8 bytes: birth txg (little-endian u64)]
//! [1 byte:  level]
//! [7 bytes: reserved, zero]
//! ```

use serde::{Deserialize, Serialize};
use snapdiff_types::{BlockAddr, ObjectId, Txg};

use crate::error::{StoreError, StoreResult};

/// Size in bytes of one encoded [`BlockPtr`].
pub const BLKPTR_SIZE: usize = 24;

/// A reference to a child block, or a hole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPtr {
    /// Block location; `None` for a hole.
    pub addr: Option<BlockAddr>,
    /// Txg in which the block was written. For a hole this is the txg in
    /// which the span was punched, or [`Txg::GENESIS`] when unknown.
    pub birth: Txg,
    /// Tree level of the referenced block (0 = data/leaf).
    pub level: u8,
}

impl BlockPtr {
    pub fn new(addr: BlockAddr, level: u8, birth: Txg) -> Self {
        Self {
            addr: Some(addr),
            birth,
            level,
        }
    }

    pub fn hole(level: u8, birth: Txg) -> Self {
        Self {
            addr: None,
            birth,
            level,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.addr.is_none()
    }

    /// Returns `true` if a walk bounded below by `min_txg` must skip this
    /// pointer: everything under it already existed at `min_txg`.
    ///
    /// Holes of unknown birth are never skipped.
    pub fn predates(&self, min_txg: Txg) -> bool {
        !self.birth.is_genesis() && self.birth <= min_txg
    }

    pub fn encode(&self) -> [u8; BLKPTR_SIZE] {
        let mut buf = [0u8; BLKPTR_SIZE];
        let raw = self.addr.map(BlockAddr::get).unwrap_or(0);
        buf[0..8].copy_from_slice(&raw.to_le_bytes());
        buf[8..16].copy_from_slice(&self.birth.get().to_le_bytes());
        buf[16] = self.level;
        buf
    }

    pub fn decode(buf: &[u8]) -> StoreResult<Self> {
        if buf.len() != BLKPTR_SIZE {
            return Err(StoreError::Corrupt {
                what: "block pointer",
                reason: format!("expected {BLKPTR_SIZE} bytes, got {}", buf.len()),
            });
        }
        if buf[17..].iter().any(|b| *b != 0) {
            return Err(StoreError::Corrupt {
                what: "block pointer",
                reason: "nonzero reserved bytes".into(),
            });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[0..8]);
        let mut birth = [0u8; 8];
        birth.copy_from_slice(&buf[8..16]);
        Ok(Self {
            addr: BlockAddr::from_raw(u64::from_le_bytes(raw)),
            birth: Txg::new(u64::from_le_bytes(birth)),
            level: buf[16],
        })
    }

    /// Encode the children of an indirect block.
    pub fn encode_indirect(children: &[BlockPtr]) -> Vec<u8> {
        let mut out = Vec::with_capacity(children.len() * BLKPTR_SIZE);
        for bp in children {
            out.extend_from_slice(&bp.encode());
        }
        out
    }

    /// Decode the children of an indirect block at `level`.
    ///
    /// Every child must sit exactly one level below its parent.
    pub fn decode_indirect(buf: &[u8], level: u8) -> StoreResult<Vec<BlockPtr>> {
        if buf.len() % BLKPTR_SIZE != 0 {
            return Err(StoreError::Corrupt {
                what: "indirect block",
                reason: format!("length {} is not a multiple of {BLKPTR_SIZE}", buf.len()),
            });
        }
        let children = buf
            .chunks_exact(BLKPTR_SIZE)
            .map(BlockPtr::decode)
            .collect::<StoreResult<Vec<_>>>()?;
        if let Some(bad) = children.iter().find(|bp| bp.level + 1 != level) {
            return Err(StoreError::Corrupt {
                what: "indirect block",
                reason: format!("child at level {} under level {level}", bad.level),
            });
        }
        Ok(children)
    }
}

/// Position of a visited block pointer: which object's tree, which level,
/// and which block at that level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bookmark {
    pub object: ObjectId,
    pub level: u8,
    pub blkid: u64,
}

impl Bookmark {
    pub fn new(object: ObjectId, level: u8, blkid: u64) -> Self {
        Self {
            object,
            level,
            blkid,
        }
    }

    /// Bookmark of the `index`-th child of this (indirect) position.
    pub fn child(&self, index: usize, geometry: &TreeGeometry) -> Self {
        debug_assert!(self.level > 0, "leaf bookmarks have no children");
        Self {
            object: self.object,
            level: self.level - 1,
            blkid: (self.blkid << geometry.fanout_shift) + index as u64,
        }
    }
}

/// Shape of a meta-dnode tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeGeometry {
    /// log2 of the number of dnode slots per level-0 block.
    pub dnodes_per_block_shift: u8,
    /// log2 of the number of block pointers per indirect block.
    pub fanout_shift: u8,
    /// Maximum number of top-level pointers held directly in the root.
    pub max_root_pointers: usize,
}

impl TreeGeometry {
    pub fn new(dnodes_per_block_shift: u8, fanout_shift: u8, max_root_pointers: usize) -> Self {
        Self {
            dnodes_per_block_shift,
            fanout_shift,
            max_root_pointers,
        }
    }

    pub fn dnodes_per_block(&self) -> usize {
        1usize << self.dnodes_per_block_shift
    }

    pub fn fanout(&self) -> usize {
        1usize << self.fanout_shift
    }

    /// log2 of the number of object ids covered by one level-`level` pointer.
    pub fn span_shift(&self, level: u8) -> u32 {
        u32::from(self.dnodes_per_block_shift) + u32::from(level) * u32::from(self.fanout_shift)
    }

    /// Inclusive object-id range covered by the pointer at `bookmark`.
    ///
    /// Ranges reaching past the object-id space are clamped to `u64::MAX`.
    pub fn span(&self, bookmark: &Bookmark) -> (ObjectId, ObjectId) {
        let shift = self.span_shift(bookmark.level).min(u64::BITS);
        let start = u128::from(bookmark.blkid) << shift;
        let end = start + (1u128 << shift) - 1;
        (saturate(start), saturate(end))
    }
}

fn saturate(n: u128) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl Default for TreeGeometry {
    /// 32 dnodes per leaf, 1024 pointers per indirect block, 3 root pointers.
    fn default() -> Self {
        Self::new(5, 10, 3)
    }
}

/// Root of a dataset's meta-dnode tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjsetRoot {
    pub geometry: TreeGeometry,
    /// Number of levels, including the leaf level. Always at least 1.
    pub nlevels: u8,
    /// Top-level pointers, each at level `nlevels - 1`.
    pub pointers: Vec<BlockPtr>,
    /// One past the highest object id the dataset has ever touched.
    /// Slots at or beyond it are unused tree capacity.
    pub object_limit: ObjectId,
}

impl ObjsetRoot {
    /// An empty tree.
    pub fn empty(geometry: TreeGeometry) -> Self {
        Self {
            geometry,
            nlevels: 1,
            pointers: Vec::new(),
            object_limit: 0,
        }
    }

    pub fn top_level(&self) -> u8 {
        self.nlevels - 1
    }

    /// Number of object slots addressable through this root.
    pub fn capacity(&self) -> u64 {
        let shift = self.geometry.span_shift(self.top_level()).min(u64::BITS);
        saturate((self.pointers.len() as u128) << shift)
    }
}
