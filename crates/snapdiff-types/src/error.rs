use thiserror::Error;

/// Errors produced while decoding on-disk and wire structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown diff record kind {0}")]
    UnknownRecordKind(u32),

    #[error("inverted range: first {first} > last {last}")]
    InvertedRange { first: u64, last: u64 },

    #[error("nonzero reserved bytes in {0}")]
    ReservedBits(&'static str),
}
