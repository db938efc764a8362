use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction group number: the pool's logical write clock.
///
/// Every block pointer records the txg in which its block was written (its
/// *birth*). A snapshot is fixed at the txg in which it was created, so any
/// subtree born at or before that txg is shared, unchanged, with every later
/// point in the dataset's history.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Txg(pub u64);

impl Txg {
    /// The genesis txg. Also used as the "unknown birth" marker on holes.
    pub const GENESIS: Txg = Txg(0);

    /// Create a txg from its raw number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The raw txg number.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for the genesis txg.
    pub const fn is_genesis(self) -> bool {
        self.0 == 0
    }

    /// The txg immediately following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for Txg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txg({})", self.0)
    }
}

impl fmt::Display for Txg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Txg {
    fn from(n: u64) -> Self {
        Self(n)
    }
}
