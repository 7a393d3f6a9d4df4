//! Mark-and-sweep collection of content whose owners have been purged.
//!
//! A sweep runs in three phases:
//!
//! 1. **Mark.** Ids referenced (now or historically) by live owners are
//!    protected. Ids referenced by purged owners are candidates. Garbage is
//!    the candidates that are not protected.
//! 2. **Refine.** Garbage ids still used as a base by a composite outside
//!    the garbage set are spared, as are ids with a live or unknown direct
//!    owner. Bases of garbage composites that nothing else uses join the
//!    garbage set. Both steps repeat until neither changes anything.
//! 3. **Sweep.** Composites are deleted before their bases, records before
//!    their payloads. Purge-marked owners are removed last, except those
//!    whose content could not be deleted.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cask_store::{BlobStore, ContentRecord, RecordStore};
use cask_types::ContentId;
use tracing::{debug, info, warn};

use crate::error::{RefError, Result};
use crate::traits::ReferenceStore;

/// Result of a garbage collection sweep.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Content records deleted.
    pub deleted: Vec<ContentId>,
    /// Purge-marked owners removed.
    pub removed_owners: Vec<String>,
    /// Unprotected ids kept because a surviving composite uses them.
    pub spared: Vec<ContentId>,
    pub failures: Vec<GcFailure>,
    /// Blob payload bytes released.
    pub bytes_freed: u64,
}

impl GcReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One item a sweep could not remove.
#[derive(Debug)]
pub enum GcFailure {
    Content { id: ContentId, error: RefError },
    Owner { owner: String, error: RefError },
}

/// Garbage collector over the reference, record and blob stores.
pub struct Collector {
    references: Arc<dyn ReferenceStore>,
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    external: Option<Arc<dyn BlobStore>>,
}

/// Records read during one sweep. Missing records are cached as `None`.
struct RecordCache<'a> {
    store: &'a dyn RecordStore,
    records: HashMap<ContentId, Option<ContentRecord>>,
}

impl<'a> RecordCache<'a> {
    fn new(store: &'a dyn RecordStore) -> Self {
        Self {
            store,
            records: HashMap::new(),
        }
    }

    fn get(&mut self, id: &ContentId) -> Result<Option<ContentRecord>> {
        if let Some(cached) = self.records.get(id) {
            return Ok(cached.clone());
        }
        let record = self.store.get(id)?;
        self.records.insert(*id, record.clone());
        Ok(record)
    }

    /// Whether some existing composite outside `excluded` uses `record`.
    fn used_outside(&mut self, record: &ContentRecord, excluded: &BTreeSet<ContentId>) -> Result<bool> {
        for composite in &record.ref_base {
            if !excluded.contains(composite) && self.get(composite)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Sets computed by the mark phase.
struct Marks {
    protected: BTreeSet<ContentId>,
    purged_owners: BTreeSet<String>,
    garbage: BTreeSet<ContentId>,
    spared: BTreeSet<ContentId>,
}

impl Marks {
    fn owned_by_live(&self, record: &ContentRecord) -> bool {
        record
            .owners
            .iter()
            .any(|owner| !self.purged_owners.contains(owner))
    }
}

impl Collector {
    pub fn new(
        references: Arc<dyn ReferenceStore>,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            references,
            records,
            blobs,
            external: None,
        }
    }

    /// Also delete `ext` payloads from this store.
    pub fn with_external(mut self, external: Arc<dyn BlobStore>) -> Self {
        self.external = Some(external);
        self
    }

    /// Run one sweep.
    ///
    /// Failures to delete individual records or owners are collected in the
    /// report; only failures to read the stores abort the sweep.
    pub fn sweep(&self) -> Result<GcReport> {
        let owners = self.references.list()?;
        let mut marks = Marks {
            protected: BTreeSet::new(),
            purged_owners: BTreeSet::new(),
            garbage: BTreeSet::new(),
            spared: BTreeSet::new(),
        };
        let mut candidates = BTreeSet::new();
        for owner in &owners {
            if owner.is_purged() {
                marks.purged_owners.insert(owner.owner.clone());
                candidates.extend(owner.all_ids().copied());
            } else {
                marks.protected.extend(owner.all_ids().copied());
            }
        }
        marks.garbage = candidates.difference(&marks.protected).copied().collect();
        debug!(
            owners = owners.len(),
            purged = marks.purged_owners.len(),
            protected = marks.protected.len(),
            garbage = marks.garbage.len(),
            "marked"
        );

        let mut cache = RecordCache::new(self.records.as_ref());
        loop {
            self.spare(&mut marks, &mut cache)?;
            if !self.cascade(&mut marks, &mut cache)? {
                break;
            }
        }

        let mut report = GcReport::default();
        let failed = self.delete_garbage(&mut marks, &mut cache, &mut report)?;
        report.spared = marks.spared.iter().copied().collect();

        for owner in owners.iter().filter(|o| o.is_purged()) {
            if owner.all_ids().any(|id| failed.contains(id)) {
                debug!(owner = %owner.owner, "keeping purged owner until its content is deleted");
                continue;
            }
            match self.references.remove_purged(&owner.owner) {
                Ok(true) => report.removed_owners.push(owner.owner.clone()),
                Ok(false) => debug!(owner = %owner.owner, "owner revived during sweep"),
                Err(error) => {
                    warn!(owner = %owner.owner, error = %error, "failed to remove owner");
                    report.failures.push(GcFailure::Owner {
                        owner: owner.owner.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            removed_owners = report.removed_owners.len(),
            spared = report.spared.len(),
            failures = report.failures.len(),
            bytes_freed = report.bytes_freed,
            "gc sweep complete"
        );
        Ok(report)
    }

    /// Drop ids from the garbage set until every remaining id is unowned
    /// and unused by any surviving composite.
    fn spare(&self, marks: &mut Marks, cache: &mut RecordCache<'_>) -> Result<()> {
        loop {
            let mut keep = Vec::new();
            for id in &marks.garbage {
                let Some(record) = cache.get(id)? else {
                    keep.push((*id, false));
                    continue;
                };
                if marks.owned_by_live(&record) {
                    keep.push((*id, false));
                } else if cache.used_outside(&record, &marks.garbage)? {
                    keep.push((*id, true));
                }
            }
            if keep.is_empty() {
                return Ok(());
            }
            for (id, as_base) in keep {
                marks.garbage.remove(&id);
                if as_base {
                    marks.spared.insert(id);
                }
            }
        }
    }

    /// Add bases of garbage composites that nothing else keeps alive.
    /// Returns whether the garbage set grew.
    fn cascade(&self, marks: &mut Marks, cache: &mut RecordCache<'_>) -> Result<bool> {
        let mut added = BTreeSet::new();
        for id in &marks.garbage {
            let Some(record) = cache.get(id)? else {
                continue;
            };
            for base in record.base_ids() {
                if marks.garbage.contains(&base)
                    || marks.protected.contains(&base)
                    || marks.spared.contains(&base)
                    || added.contains(&base)
                {
                    continue;
                }
                let Some(base_record) = cache.get(&base)? else {
                    continue;
                };
                if marks.owned_by_live(&base_record) {
                    continue;
                }
                if !cache.used_outside(&base_record, &marks.garbage)? {
                    added.insert(base);
                }
            }
        }
        if added.is_empty() {
            return Ok(false);
        }
        debug!(added = added.len(), "cascaded to unused bases");
        marks.garbage.extend(added);
        Ok(true)
    }

    /// Delete the garbage set, composites first. Returns the ids left in
    /// place, either because deleting them failed or because a composite
    /// using them could not be deleted.
    fn delete_garbage(
        &self,
        marks: &mut Marks,
        cache: &mut RecordCache<'_>,
        report: &mut GcReport,
    ) -> Result<BTreeSet<ContentId>> {
        let mut remaining = marks.garbage.clone();
        let mut failed = BTreeSet::new();
        while !remaining.is_empty() {
            let mut batch = Vec::new();
            for id in &remaining {
                let used = match cache.get(id)? {
                    Some(record) => record
                        .ref_base
                        .iter()
                        .any(|composite| composite != id && remaining.contains(composite)),
                    None => false,
                };
                if !used {
                    batch.push(*id);
                }
            }
            if batch.is_empty() {
                batch.extend(remaining.iter().copied());
            }

            for id in batch {
                if !remaining.remove(&id) {
                    continue;
                }
                let Some(record) = cache.get(&id)? else {
                    continue;
                };
                match self.delete_record(&record) {
                    Ok(freed) => {
                        report.deleted.push(id);
                        report.bytes_freed += freed;
                    }
                    Err(error) => {
                        warn!(id = %id, error = %error, "failed to delete content");
                        failed.insert(id);
                        report.failures.push(GcFailure::Content { id, error });
                        self.hold_bases(&record, &mut remaining, marks, &mut failed, cache)?;
                    }
                }
            }
        }
        Ok(failed)
    }

    /// Keep every base of a composite that survived the sweep.
    fn hold_bases(
        &self,
        record: &ContentRecord,
        remaining: &mut BTreeSet<ContentId>,
        marks: &mut Marks,
        failed: &mut BTreeSet<ContentId>,
        cache: &mut RecordCache<'_>,
    ) -> Result<()> {
        let mut stack: Vec<ContentId> = record.base_ids().into_iter().collect();
        while let Some(base) = stack.pop() {
            if !remaining.remove(&base) {
                continue;
            }
            marks.spared.insert(base);
            failed.insert(base);
            if let Some(base_record) = cache.get(&base)? {
                stack.extend(base_record.base_ids());
            }
        }
        Ok(())
    }

    /// Delete a record, then its payloads. Returns the payload bytes freed.
    fn delete_record(&self, record: &ContentRecord) -> Result<u64> {
        self.records.delete(&record.id)?;
        let mut freed = 0;
        for key in record.local_blob_keys() {
            freed += self.blobs.size(&key)?.unwrap_or(0);
            self.blobs.delete(&key)?;
        }
        for key in record.external_keys() {
            match &self.external {
                Some(external) => {
                    freed += external.size(&key)?.unwrap_or(0);
                    external.delete(&key)?;
                }
                None => warn!(id = %record.id, key = %key, "no external store; payload left in place"),
            }
        }
        debug!(id = %record.id, freed, "deleted content");
        Ok(freed)
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("external", &self.external.is_some())
            .finish_non_exhaustive()
    }
}
