use cask_types::ContentId;

/// Errors from record and blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested content record was not found.
    #[error("content not found: {0}")]
    NotFound(ContentId),

    /// The requested blob payload was not found.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Blob keys are restricted to a portable character set.
    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),

    /// A record names a base that does not exist, or an alternative
    /// representation omits its store tag.
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Unknown `store` tag on a record, alternative or piece.
    #[error("unsupported storage scheme: {0:?}")]
    UnsupportedScheme(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
