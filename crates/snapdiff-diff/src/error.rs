//! Error types for the diff crate.

use snapdiff_store::StoreError;
use snapdiff_types::{DatasetId, TypeError, RECORD_SIZE};

/// Errors that can occur while producing or reading a diff stream.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// A dataset handed to the diff is not a snapshot.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The baseline is not an older ancestor of the target.
    #[error("cross-device diff: {0}")]
    CrossDevice(String),

    /// Cancellation was requested while the tree was being walked.
    #[error("diff interrupted")]
    Interrupted,

    /// Writing to the sink or reading a stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading pool metadata or a block failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The clone-origin chain loops or is deeper than allowed.
    #[error("clone lineage of {dataset} does not terminate within {hops} hops")]
    LineageCycle { dataset: DatasetId, hops: usize },

    /// A diff stream ended part way through a record.
    #[error("truncated diff record at offset {offset}: {got} of {} bytes", RECORD_SIZE)]
    TruncatedRecord { offset: u64, got: usize },

    /// A diff stream holds a record that does not decode.
    #[error("malformed diff record at offset {offset}: {source}")]
    MalformedRecord {
        offset: u64,
        #[source]
        source: TypeError,
    },

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DiffError {
    /// Returns `true` for block read and sink write failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Store(_))
    }
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
