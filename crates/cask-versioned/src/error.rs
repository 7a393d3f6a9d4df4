use thiserror::Error;

use crate::document::Document;

/// Errors from versioned document operations.
#[derive(Debug, Error)]
pub enum VersionedError {
    /// No live document has this id.
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// A live document already has this id.
    #[error("document already exists: {id}")]
    AlreadyExists { id: String },

    /// The document is missing its id or carries a malformed version.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The caller's base version is not the persisted version.
    ///
    /// Carries both documents so the caller can reconcile and retry.
    #[error("version conflict on {id}: based on version {base_version}, current is {current_version}")]
    VersionConflict {
        id: String,
        base_version: u64,
        current_version: u64,
        base: Box<Document>,
        current: Box<Document>,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for versioned document operations.
pub type VersionedResult<T> = Result<T, VersionedError>;
