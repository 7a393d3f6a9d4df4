//! Content record and blob storage for Cask.
//!
//! Content records are keyed by the SHA-1 of the bytes they represent and
//! describe how those bytes are laid out: inline in the record, as a blob
//! payload, as a concatenation of pieces of other records, as a member of a
//! stored zip archive, or in an external blob store.
//!
//! # Record Types
//!
//! - [`ContentRecord`] -- the persisted, digest-keyed record
//! - [`Scheme`] -- one representation of a record's bytes
//! - [`Piece`] -- one segment of a concatenation
//!
//! # Storage Backends
//!
//! - [`RecordStore`] / [`InMemoryRecordStore`] -- ordered record storage
//! - [`BlobStore`] / [`InMemoryBlobStore`], [`FsBlobStore`] -- streamed payloads
//!
//! # Design Rules
//!
//! 1. Records are immutable once written, apart from appending to their
//!    set-valued fields and swapping the primary scheme during migration.
//! 2. Write-then-link: payload blobs and base records exist before the
//!    record that points at them is inserted.
//! 3. No operation spans more than one record.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryRecordStore};
pub use record::{gzip_blob_key, raw_blob_key, ContentRecord, Piece, Scheme};
pub use traits::{validate_blob_key, BlobStore, RecordStore};
