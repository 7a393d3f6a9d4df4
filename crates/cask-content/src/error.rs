use std::io;

use cask_codec::CodecError;
use cask_store::StoreError;
use cask_types::{ContentId, TypeError};
use thiserror::Error;

/// Errors from content store operations.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Referenced content does not exist.
    #[error("content not found: {0}")]
    NotFound(ContentId),

    /// A digest prefix matches more than one stored id.
    #[error("ambiguous content prefix {prefix}: matches {}", format_ids(.matches))]
    AmbiguousPrefix {
        prefix: String,
        matches: Vec<ContentId>,
    },

    /// A piece names a missing base, or a scheme is missing its store tag.
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    #[error("unsupported storage scheme: {0:?}")]
    UnsupportedScheme(String),

    /// A requested range falls outside the content.
    #[error("range {offset}+{length} exceeds the {available} bytes of {id}")]
    InvalidRange {
        id: ContentId,
        offset: u64,
        length: u64,
        available: u64,
    },

    /// An alternative representation disagrees with the record's length.
    #[error("length mismatch for {id}: record has {expected} bytes, got {actual}")]
    LengthMismatch {
        id: ContentId,
        expected: u64,
        actual: u64,
    },

    /// Decoded bytes hash to a different id than the record they belong to.
    #[error("content {id} decodes to bytes with digest {actual}")]
    DigestMismatch { id: ContentId, actual: ContentId },

    #[error("zip member not found: {0}")]
    ZipMemberNotFound(String),

    #[error("no external blob store configured")]
    NoExternalStore,

    /// A record changed while an operation was replacing its scheme.
    #[error("content record {0} changed concurrently")]
    Modified(ContentId),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Size mismatch or malformed data while decoding.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn format_ids(ids: &[ContentId]) -> String {
    ids.iter().map(ContentId::short_hex).collect::<Vec<_>>().join(", ")
}

impl From<StoreError> for ContentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ContentError::NotFound(id),
            StoreError::ReferentialIntegrity(msg) => ContentError::ReferentialIntegrity(msg),
            StoreError::UnsupportedScheme(tag) => ContentError::UnsupportedScheme(tag),
            StoreError::Io(e) => ContentError::from_io(e),
            other => ContentError::Store(other),
        }
    }
}

impl ContentError {
    /// Wrap this error in an `io::Error` so it can cross a `Read` boundary.
    pub fn into_io(self) -> io::Error {
        match self {
            ContentError::Io(e) => e,
            ContentError::Decode(codec) => codec.into_io(),
            other => io::Error::other(other),
        }
    }

    /// Recover a typed error that crossed a `Read` boundary.
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ContentError>()) {
            return match CodecError::from_io(err) {
                CodecError::Io(e) => ContentError::Io(e),
                codec => ContentError::Decode(codec),
            };
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<ContentError>() {
                Ok(content) => *content,
                Err(other) => ContentError::Io(io::Error::new(kind, other)),
            },
            None => ContentError::Io(io::Error::from(kind)),
        }
    }

    /// Returns `true` for errors caused by malformed or inconsistent data.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, ContentError::Decode(codec) if codec.is_decode_error())
    }
}

/// Result alias for content store operations.
pub type ContentResult<T> = Result<T, ContentError>;
