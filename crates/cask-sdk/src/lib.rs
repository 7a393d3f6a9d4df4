//! High-level SDK for Cask.
//!
//! Provides a unified API over the content store, reference tracking,
//! garbage collection and versioned owner documents. This is the main entry
//! point for a directory-tree layer embedding Cask.

pub mod cask;
pub mod error;

pub use cask::Cask;
pub use error::{SdkError, SdkResult};

// Re-export key types
pub use cask_content::{ByteStream, ConcatPiece, Content, ContentMeta, StoreConfig};
pub use cask_refs::{GcReport, ReferenceRecord};
pub use cask_types::{ContentId, ContentPointer, InlinePointer, StoredPointer};
pub use cask_versioned::{Document, Revision};
