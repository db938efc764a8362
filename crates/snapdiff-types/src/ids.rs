use std::fmt;

use serde::{Deserialize, Serialize};

/// Object (dnode) number within a dataset.
pub type ObjectId = u64;

/// Object number of the meta-dnode: the object whose data blocks hold the
/// array of every other object's dnode.
pub const META_DNODE_OBJECT: ObjectId = 0;

/// Identifier of a dataset (filesystem, snapshot or clone) in a pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(pub u64);

/// Identifier of a dataset directory.
///
/// A directory groups a head dataset with all of its snapshots. A clone gets
/// its own directory whose origin points back at the snapshot it was cloned
/// from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirId(pub u64);

/// Address of an allocated block in the pool.
///
/// Address zero is reserved: on disk it marks a hole.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockAddr(pub u64);

impl BlockAddr {
    /// Build an address from its raw on-disk value; zero means "no block".
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// The raw on-disk value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ds#{}", self.0)
    }
}

impl fmt::Debug for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirId({})", self.0)
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dir#{}", self.0)
    }
}

impl fmt::Debug for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockAddr({:#x})", self.0)
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
