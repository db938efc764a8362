//! On-disk dnode records as stored in the meta-dnode's level-0 blocks.
//!
//! Each record is [`DNODE_SIZE`] bytes:
//!
//! ```text
//! [1 byte:  object type tag, 0 = none (slot unallocated)]
//! [7 bytes: reserved, zero]
//! [8 bytes: generation txg (little-endian u64)]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::record::read_u64;
use crate::txg::Txg;

/// Size in bytes of one on-disk dnode record.
pub const DNODE_SIZE: usize = 16;

/// Type tag of the object held in a dnode slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ObjectType {
    /// Unallocated slot.
    None,
    PlainFile,
    Directory,
    /// A type this crate does not interpret. Still an allocated object.
    Other(u8),
}

impl ObjectType {
    pub fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::PlainFile => 19,
            Self::Directory => 20,
            Self::Other(tag) => tag,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Self::None,
            19 => Self::PlainFile,
            20 => Self::Directory,
            other => Self::Other(other),
        }
    }

    /// The canonical form of this type: `Other` tags that name a known
    /// type (or none) collapse onto that variant.
    pub fn normalized(self) -> Self {
        Self::from_tag(self.tag())
    }

    /// Returns `true` for any type whose tag is not the none tag.
    pub fn is_allocated(self) -> bool {
        self.tag() != 0
    }
}

/// One dnode slot as read from disk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DnodePhys {
    pub object_type: ObjectType,
    /// Txg in which the object occupying this slot was allocated.
    pub generation: Txg,
}

impl DnodePhys {
    /// An unallocated slot.
    pub const fn free() -> Self {
        Self {
            object_type: ObjectType::None,
            generation: Txg::GENESIS,
        }
    }

    pub fn allocated(object_type: ObjectType, generation: Txg) -> Self {
        Self {
            object_type,
            generation,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.object_type.is_allocated()
    }

    pub fn encode(&self) -> [u8; DNODE_SIZE] {
        let mut buf = [0u8; DNODE_SIZE];
        buf[0] = self.object_type.tag();
        buf[8..16].copy_from_slice(&self.generation.get().to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TypeError> {
        if buf.len() != DNODE_SIZE {
            return Err(TypeError::InvalidLength {
                expected: DNODE_SIZE,
                actual: buf.len(),
            });
        }
        if buf[1..8].iter().any(|b| *b != 0) {
            return Err(TypeError::ReservedBits("dnode"));
        }
        Ok(Self {
            object_type: ObjectType::from_tag(buf[0]),
            generation: Txg::new(read_u64(&buf[8..16])),
        })
    }

    /// Encode a whole block of dnodes.
    pub fn encode_block(dnodes: &[DnodePhys]) -> Vec<u8> {
        let mut out = Vec::with_capacity(dnodes.len() * DNODE_SIZE);
        for dn in dnodes {
            out.extend_from_slice(&dn.encode());
        }
        out
    }

    /// Decode a block of dnodes. The block must hold a whole number of
    /// records.
    pub fn decode_block(buf: &[u8]) -> Result<Vec<DnodePhys>, TypeError> {
        if buf.len() % DNODE_SIZE != 0 {
            return Err(TypeError::InvalidLength {
                expected: (buf.len() / DNODE_SIZE + 1) * DNODE_SIZE,
                actual: buf.len(),
            });
        }
        buf.chunks_exact(DNODE_SIZE).map(DnodePhys::decode).collect()
    }
}

impl Default for DnodePhys {
    fn default() -> Self {
        Self::free()
    }
}
