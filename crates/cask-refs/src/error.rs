//! Error types for reference tracking and garbage collection.

use cask_store::StoreError;
use thiserror::Error;

/// Errors that can occur during reference and sweep operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// No reference record exists for the owner.
    #[error("owner not found: {owner}")]
    NotFound { owner: String },

    /// Owner ids must be non-empty.
    #[error("invalid owner id: {0:?}")]
    InvalidOwner(String),

    /// Failure in the content record or blob store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for reference operations.
pub type Result<T> = std::result::Result<T, RefError>;
