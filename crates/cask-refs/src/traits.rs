//! The [`ReferenceStore`] trait defining the reference storage interface.

use std::collections::BTreeSet;

use cask_types::ContentId;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::ReferenceRecord;

/// Storage backend for owner reference records.
///
/// Implementations must be thread-safe (`Send + Sync`) and apply every
/// mutator atomically to a single record. No operation spans owners.
pub trait ReferenceStore: Send + Sync {
    /// Read an owner's record.
    ///
    /// Returns `Ok(None)` if the owner has no record.
    fn get(&self, owner: &str) -> Result<Option<ReferenceRecord>>;

    /// Replace an owner's current references, creating the record if needed.
    ///
    /// The new ids are unioned into the history and any purge mark is
    /// cleared. Returns the updated record.
    fn set_refs(&self, owner: &str, refs: &BTreeSet<ContentId>) -> Result<ReferenceRecord>;

    /// Mark an owner as deleted.
    ///
    /// Fails with `NotFound` if the owner has no record.
    fn mark_purge(&self, owner: &str, at: DateTime<Utc>) -> Result<()>;

    /// Delete an owner's record if it still carries a purge mark.
    ///
    /// Returns `Ok(true)` if the record was deleted.
    fn remove_purged(&self, owner: &str) -> Result<bool>;

    /// Delete an owner's record unconditionally.
    ///
    /// Returns `Ok(true)` if it existed.
    fn delete(&self, owner: &str) -> Result<bool>;

    /// All records, ordered by owner.
    fn list(&self) -> Result<Vec<ReferenceRecord>>;

    /// Records carrying a purge mark.
    fn purged(&self) -> Result<Vec<ReferenceRecord>> {
        Ok(self.list()?.into_iter().filter(ReferenceRecord::is_purged).collect())
    }
}
