//! Content digests for Cask.
//!
//! Every content record is keyed by the SHA-1 digest of the exact byte
//! stream it represents. This crate computes those digests in a single
//! streaming pass, either by draining a reader or by observing bytes as they
//! flow through a [`HashingReader`] / [`HashingWriter`].
//!
//! Digests of composite content are always computed over the composed byte
//! stream itself, never derived from the digests of its parts.

pub mod hasher;

pub use hasher::{ContentHasher, HashingReader, HashingWriter};
