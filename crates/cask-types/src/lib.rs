//! Foundation types for Cask, the content-addressed storage kernel.
//!
//! This crate provides the identifier and pointer types shared by every other
//! Cask crate. It has no storage logic of its own.
//!
//! # Key Types
//!
//! - [`ContentId`] -- 20-byte SHA-1 digest of an exact byte stream
//! - [`ContentPointer`] -- lightweight reference to content, either carried
//!   inline ([`InlinePointer`]) or stored by digest ([`StoredPointer`])
//! - [`RepeatingReader`] -- streaming view over an inline pointer's bytes

pub mod error;
pub mod id;
pub mod pointer;

pub use error::TypeError;
pub use id::ContentId;
pub use pointer::{ContentPointer, InlinePointer, RepeatingReader, StoredPointer};
