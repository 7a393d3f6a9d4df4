//! Versioned owner documents with optimistic concurrency.
//!
//! Every document carries a string `_id` and an integer `_version`. Updates
//! are compare-and-swap on the version: a writer whose base version is stale
//! gets a [`VersionedError::VersionConflict`] carrying both documents, and
//! nothing is written. Superseded revisions are kept in a shadow history
//! keyed by `{_id, _version}`, and removal leaves a terminal marker there.
//!
//! # Modules
//!
//! - [`error`] -- Error types for document operations
//! - [`document`] -- [`Document`] helpers and [`Revision`]
//! - [`traits`] -- The [`DocumentStore`] trait defining the storage interface
//! - [`memory`] -- In-memory [`InMemoryDocumentStore`] for tests
//! - [`versioned`] -- [`VersionedDocuments`], the insert/update/remove API
//!
//! # Design Rules
//!
//! 1. Versions advance by exactly one per successful update
//! 2. A shadow entry is written before the live document it preserves is replaced
//! 3. No locks are held across calls; conflicts surface as errors

pub mod document;
pub mod error;
pub mod memory;
pub mod traits;
pub mod versioned;

pub use document::{from_document, to_document, Document, Revision};
pub use error::{VersionedError, VersionedResult};
pub use memory::InMemoryDocumentStore;
pub use traits::DocumentStore;
pub use versioned::VersionedDocuments;
