use std::io;

use thiserror::Error;

/// Errors from encoding and decoding content bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("malformed zip header at offset {offset}: {reason}")]
    InvalidZipHeader { offset: u64, reason: String },

    #[error("malformed zip archive: {0}")]
    InvalidArchive(String),

    #[error("unsupported zip compression method: {0}")]
    UnsupportedZipMethod(u16),

    #[error("CRC32 mismatch: expected {expected:08x}, computed {computed:08x}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Wrap this error in an `io::Error` so it can cross a `Read` boundary.
    pub fn into_io(self) -> io::Error {
        match self {
            CodecError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recover a codec error that crossed a `Read` boundary.
    ///
    /// Plain I/O errors come back as [`CodecError::Io`].
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CodecError>()) {
            return CodecError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<CodecError>() {
                Ok(codec) => *codec,
                Err(other) => CodecError::Io(io::Error::new(kind, other)),
            },
            None => CodecError::Io(io::Error::from(kind)),
        }
    }

    /// Returns `true` for errors caused by malformed or inconsistent data.
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, CodecError::Io(_) | CodecError::CompressionFailed(_))
    }
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
