//! Content store for Cask.
//!
//! [`ContentStore`] turns byte streams into SHA-1 addressed records and
//! back. On write it picks a representation per input and deduplicates by
//! digest; on read it decodes any representation into a stream, with
//! random access over an `(offset, length)` window.
//!
//! # Representations
//!
//! - inline (`in`) and deflated inline (`zin`) bytes inside the record
//! - gzip (`gz`) and raw blob payloads
//! - concatenations (`cat`) of literal bytes and slices of other records,
//!   built by [`ContentStore::calculate_concatenation`]
//! - members of stored zip archives, see [`ContentStore::extract_zip_member`]
//! - payloads in an external blob store, see
//!   [`ContentStore::migrate_to_external`]
//!
//! # Design Rules
//!
//! 1. A record's id is always the digest of the exact bytes it decodes to.
//! 2. Bases are registered (`ref_base`) before a composite that uses them
//!    is inserted.
//! 3. Stored composites never reference other concatenations; slices of
//!    concatenations are flattened into the underlying pieces.
//! 4. Decoded sizes are checked against declared lengths on every read.
//! 5. Configuration is passed in explicitly as a [`StoreConfig`].

pub mod archive;
pub mod concat;
pub mod config;
pub mod error;
pub mod migrate;
mod read;
mod spool;
pub mod store;

pub use archive::ZipMember;
pub use concat::{slice_pieces, ConcatPiece};
pub use config::StoreConfig;
pub use error::{ContentError, ContentResult};
pub use migrate::{MigrationFailure, MigrationReport};
pub use read::{ByteStream, Content};
pub use store::{ContentMeta, ContentStore};
