//! Reference tracking and garbage collection for Cask content.
//!
//! Owners (documents, files, anything with a caller-defined id) report the
//! content they point to. Content is never reference counted; instead a
//! batch sweep deletes content that only purged owners ever pointed to.
//!
//! # Architecture
//!
//! - **Reference records** hold an owner's current `refs`, the growing
//!   `ref_history` of everything it ever pointed to, and an optional
//!   `purge` mark set once the owner has been deleted.
//! - **The tracker** replaces an owner's references on every change and
//!   sets the purge mark.
//! - **The collector** protects everything live owners reference, now or
//!   historically, together with every base a surviving composite needs,
//!   and deletes the rest of what purged owners referenced.
//!
//! # Modules
//!
//! - [`error`] -- Error types for reference operations
//! - [`types`] -- [`ReferenceRecord`]
//! - [`traits`] -- The [`ReferenceStore`] trait defining the storage interface
//! - [`memory`] -- In-memory [`InMemoryReferenceStore`] for tests
//! - [`tracker`] -- [`ReferenceTracker`]
//! - [`gc`] -- [`Collector`] and [`GcReport`]

pub mod error;
pub mod gc;
pub mod memory;
pub mod tracker;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use gc::{Collector, GcFailure, GcReport};
pub use memory::InMemoryReferenceStore;
pub use tracker::ReferenceTracker;
pub use traits::ReferenceStore;
pub use types::ReferenceRecord;
