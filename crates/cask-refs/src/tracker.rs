//! Recording which content each owner points to.

use std::collections::BTreeSet;
use std::sync::Arc;

use cask_types::{ContentId, ContentPointer};
use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::traits::ReferenceStore;
use crate::types::ReferenceRecord;

/// Owner-facing side of reference tracking.
///
/// Callers report an owner's full set of pointers on every change to the
/// owner, including changes that leave it with no content, and purge the
/// owner once it has been deleted.
#[derive(Clone)]
pub struct ReferenceTracker {
    store: Arc<dyn ReferenceStore>,
}

impl ReferenceTracker {
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ReferenceStore> {
        &self.store
    }

    /// Set the owner's current references to the stored pointers in
    /// `pointers`. Inline pointers hold their bytes and are skipped.
    pub fn update_references(
        &self,
        owner: &str,
        pointers: &[ContentPointer],
    ) -> Result<ReferenceRecord> {
        let refs: BTreeSet<ContentId> = pointers.iter().filter_map(ContentPointer::stored_id).collect();
        let record = self.store.set_refs(owner, &refs)?;
        debug!(owner, refs = record.refs.len(), history = record.ref_history.len(), "updated references");
        Ok(record)
    }

    /// Mark a deleted owner's content as eligible for the next sweep.
    pub fn purge(&self, owner: &str) -> Result<()> {
        self.store.mark_purge(owner, Utc::now())?;
        debug!(owner, "purge marked");
        Ok(())
    }

    /// The owner's reference record, if any.
    pub fn references(&self, owner: &str) -> Result<Option<ReferenceRecord>> {
        self.store.get(owner)
    }
}

impl std::fmt::Debug for ReferenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceTracker").finish_non_exhaustive()
    }
}
