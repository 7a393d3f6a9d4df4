//! In-memory reference store for testing and ephemeral use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use cask_types::ContentId;
use chrono::{DateTime, Utc};

use crate::error::{RefError, Result};
use crate::traits::ReferenceStore;
use crate::types::ReferenceRecord;

/// An in-memory implementation of [`ReferenceStore`].
///
/// Records live in a `BTreeMap` behind a `RwLock`, so listing is ordered
/// by owner. Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryReferenceStore {
    records: RwLock<BTreeMap<String, ReferenceRecord>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }
}

fn validate_owner(owner: &str) -> Result<()> {
    if owner.is_empty() {
        return Err(RefError::InvalidOwner(owner.to_string()));
    }
    Ok(())
}

impl ReferenceStore for InMemoryReferenceStore {
    fn get(&self, owner: &str) -> Result<Option<ReferenceRecord>> {
        Ok(self.records.read().expect("lock poisoned").get(owner).cloned())
    }

    fn set_refs(&self, owner: &str, refs: &BTreeSet<ContentId>) -> Result<ReferenceRecord> {
        validate_owner(owner)?;
        let mut records = self.records.write().expect("lock poisoned");
        let record = records
            .entry(owner.to_string())
            .or_insert_with(|| ReferenceRecord::new(owner));
        record.set_refs(refs.clone());
        record.purge = None;
        Ok(record.clone())
    }

    fn mark_purge(&self, owner: &str, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().expect("lock poisoned");
        let record = records.get_mut(owner).ok_or_else(|| RefError::NotFound {
            owner: owner.to_string(),
        })?;
        record.purge = Some(at);
        Ok(())
    }

    fn remove_purged(&self, owner: &str) -> Result<bool> {
        let mut records = self.records.write().expect("lock poisoned");
        if records.get(owner).is_some_and(ReferenceRecord::is_purged) {
            records.remove(owner);
            return Ok(true);
        }
        Ok(false)
    }

    fn delete(&self, owner: &str) -> Result<bool> {
        Ok(self
            .records
            .write()
            .expect("lock poisoned")
            .remove(owner)
            .is_some())
    }

    fn list(&self) -> Result<Vec<ReferenceRecord>> {
        Ok(self
            .records
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(tag: &[u8]) -> ContentId {
        ContentId::digest(tag)
    }

    #[test]
    fn set_refs_creates_and_replaces() {
        let store = InMemoryReferenceStore::new();
        let first = store.set_refs("doc", &[id(b"a")].into()).unwrap();
        assert_eq!(first.refs, [id(b"a")].into());

        let second = store.set_refs("doc", &[id(b"b")].into()).unwrap();
        assert_eq!(second.refs, [id(b"b")].into());
        assert_eq!(second.ref_history, [id(b"a"), id(b"b")].into());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_update_keeps_history() {
        let store = InMemoryReferenceStore::new();
        store.set_refs("doc", &[id(b"a")].into()).unwrap();
        let record = store.set_refs("doc", &BTreeSet::new()).unwrap();
        assert!(record.refs.is_empty());
        assert_eq!(record.ref_history, [id(b"a")].into());
    }

    #[test]
    fn purge_marks_and_update_clears() {
        let store = InMemoryReferenceStore::new();
        store.set_refs("doc", &BTreeSet::new()).unwrap();
        store.mark_purge("doc", Utc::now()).unwrap();
        assert!(store.get("doc").unwrap().unwrap().is_purged());
        assert_eq!(store.purged().unwrap().len(), 1);

        store.set_refs("doc", &BTreeSet::new()).unwrap();
        assert!(!store.get("doc").unwrap().unwrap().is_purged());
    }

    #[test]
    fn purge_unknown_owner_fails() {
        let store = InMemoryReferenceStore::new();
        let err = store.mark_purge("ghost", Utc::now()).unwrap_err();
        assert!(matches!(err, RefError::NotFound { owner } if owner == "ghost"));
    }

    #[test]
    fn remove_purged_skips_live_owners() {
        let store = InMemoryReferenceStore::new();
        store.set_refs("live", &BTreeSet::new()).unwrap();
        store.set_refs("gone", &BTreeSet::new()).unwrap();
        store.mark_purge("gone", Utc::now()).unwrap();

        assert!(!store.remove_purged("live").unwrap());
        assert!(store.remove_purged("gone").unwrap());
        assert!(!store.remove_purged("gone").unwrap());
        let owners: Vec<String> = store.list().unwrap().into_iter().map(|r| r.owner).collect();
        assert_eq!(owners, vec!["live".to_string()]);
    }

    #[test]
    fn rejects_empty_owner() {
        let store = InMemoryReferenceStore::new();
        assert!(matches!(
            store.set_refs("", &BTreeSet::new()),
            Err(RefError::InvalidOwner(_))
        ));
    }

    #[test]
    fn delete_is_unconditional() {
        let store = InMemoryReferenceStore::new();
        store.set_refs("doc", &BTreeSet::new()).unwrap();
        assert!(store.delete("doc").unwrap());
        assert!(!store.delete("doc").unwrap());
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn history_is_union_of_every_update(
            updates in proptest::collection::vec(proptest::collection::btree_set(0u8..16, 0..5), 1..8)
        ) {
            let store = InMemoryReferenceStore::new();
            let mut expected = BTreeSet::new();
            let mut last = BTreeSet::new();
            for tags in &updates {
                let refs: BTreeSet<ContentId> = tags.iter().map(|t| id(&[*t])).collect();
                expected.extend(refs.iter().copied());
                last = store.set_refs("doc", &refs).unwrap().refs;
                prop_assert_eq!(&last, &refs);
            }
            let record = store.get("doc").unwrap().unwrap();
            prop_assert_eq!(record.ref_history, expected);
            prop_assert_eq!(record.refs, last);
        }
    }
}
