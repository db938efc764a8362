use snapdiff_types::{BlockAddr, DatasetId, TypeError};

/// Errors from pool, catalog and block cache operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested dataset does not exist.
    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    /// No block is stored at the given address.
    #[error("block not found: {0}")]
    BlockNotFound(BlockAddr),

    /// A read was attempted through a hole pointer.
    #[error("cannot read a hole at level {level}")]
    ReadHole { level: u8 },

    /// The device failed to return the block.
    #[error("read failed for block {0}")]
    ReadFault(BlockAddr),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An on-disk structure is malformed.
    #[error("corrupt {what}: {reason}")]
    Corrupt { what: &'static str, reason: String },

    /// An on-disk record failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] TypeError),

    /// The dataset is a snapshot and cannot be modified.
    #[error("dataset {0} is read-only")]
    ReadOnly(DatasetId),

    /// The operation requires a snapshot.
    #[error("dataset {0} is not a snapshot")]
    NotASnapshot(DatasetId),

    /// The object type encodes as a free slot.
    #[error("object type tag {0} cannot be allocated")]
    UnallocatableType(u8),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
