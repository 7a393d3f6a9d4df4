use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("digest prefix too long: {0} bytes")]
    PrefixTooLong(usize),

    #[error("invalid content pointer: {0}")]
    InvalidPointer(String),
}
