//! Codec layer for Cask.
//!
//! Provides the byte-level transforms the content store uses to pick a
//! compact representation and to reconstruct byte-exact streams on read.
//!
//! # Modules
//!
//! - [`deflate`] -- raw DEFLATE for small inline payloads (`zin`)
//! - [`gzip`] -- gzip-wrapped payloads for streamed blobs (`gz`)
//! - [`exact`] -- readers that enforce a declared decoded length
//! - [`zip`] -- local headers and in-place member decoding
//!
//! Compression helpers return `None` when the encoded form is not smaller
//! than the limit they were given; callers then keep the original bytes.
//! Decoding to a size other than the declared one is always an error.

pub mod deflate;
pub mod error;
pub mod exact;
pub mod gzip;
pub mod zip;

pub use deflate::{inflate, try_deflate};
pub use error::{CodecError, CodecResult};
pub use exact::ExactReader;
pub use gzip::{gunzip, gzip_reader, gzip_stream, try_gzip};
pub use zip::{LocalHeader, ZipEntryReader};
