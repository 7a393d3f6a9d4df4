use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::document::{
    deleted_marker, document_id, document_version, persisted_version, Document, Revision,
    VERSION_FIELD,
};
use crate::error::{VersionedError, VersionedResult};
use crate::traits::DocumentStore;

/// Versioned collection of owner documents.
///
/// A document moves through versions 1, 2, ... N, each update advancing the
/// version by exactly one, and ends with a deletion marker at N + 1. Every
/// superseded revision is copied to the shadow history before it is
/// replaced. Concurrent writers are detected by compare-and-swap on the
/// version, never by locking.
#[derive(Clone)]
pub struct VersionedDocuments {
    store: Arc<dyn DocumentStore>,
}

impl VersionedDocuments {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Insert a new document at version 1.
    ///
    /// The document must have a string `_id` and no `_version`.
    pub fn insert(&self, mut doc: Document) -> VersionedResult<Document> {
        let id = document_id(&doc)?.to_string();
        if doc.contains_key(VERSION_FIELD) {
            return Err(VersionedError::InvalidDocument(format!(
                "new document {id} must not carry {VERSION_FIELD}"
            )));
        }
        doc.insert(VERSION_FIELD.to_string(), Value::from(1u64));
        if !self.store.insert(&id, &doc)? {
            return Err(VersionedError::AlreadyExists { id });
        }
        debug!(id = %id, "inserted document");
        Ok(doc)
    }

    /// Replace a document, based on the version it carries.
    ///
    /// Fails with `VersionConflict` if the persisted version differs from
    /// the document's `_version`, whether detected up front or by losing the
    /// conditional replace. Returns the stored document.
    pub fn update(&self, mut doc: Document) -> VersionedResult<Document> {
        let id = document_id(&doc)?.to_string();
        let base_version = document_version(&doc)?.ok_or_else(|| {
            VersionedError::InvalidDocument(format!("update of {id} must carry {VERSION_FIELD}"))
        })?;
        let current = self.require(&id)?;
        let current_version = persisted_version(&current)?;
        if current_version != base_version {
            return Err(conflict(id, doc, current, current_version, base_version));
        }

        self.store.put_shadow(&id, current_version, &current)?;
        doc.insert(VERSION_FIELD.to_string(), Value::from(base_version + 1));
        if !self.store.replace_if_version(&id, base_version, &doc)? {
            let current = self.require(&id)?;
            let current_version = persisted_version(&current)?;
            doc.insert(VERSION_FIELD.to_string(), Value::from(base_version));
            return Err(conflict(id, doc, current, current_version, base_version));
        }
        debug!(id = %id, version = base_version + 1, "updated document");
        Ok(doc)
    }

    /// Delete a document, leaving its history and a deletion marker.
    ///
    /// The marker is stored at the next version with `_version` set to
    /// `"deleted:<last version>"` and carries the fields of `extra` (who
    /// deleted it and when, for example).
    pub fn remove(&self, id: &str, extra: Document) -> VersionedResult<()> {
        let current = self.require(id)?;
        let version = persisted_version(&current)?;
        self.store.put_shadow(id, version, &current)?;

        let mut marker = extra;
        marker.insert(VERSION_FIELD.to_string(), deleted_marker(version));
        self.store.put_shadow(id, version + 1, &marker)?;

        if !self.store.delete_if_version(id, version)? {
            let latest = self.require(id)?;
            let latest_version = persisted_version(&latest)?;
            return Err(conflict(id.to_string(), current, latest, latest_version, version));
        }
        debug!(id, version, "removed document");
        Ok(())
    }

    /// The live document, if any.
    pub fn get(&self, id: &str) -> VersionedResult<Option<Document>> {
        self.store.get(id)
    }

    /// Past revisions ordered by version, ending with the deletion marker
    /// if the document was removed. The live document is not included.
    pub fn history(&self, id: &str) -> VersionedResult<Vec<Revision>> {
        let live_version = match self.store.get(id)? {
            Some(doc) => Some(persisted_version(&doc)?),
            None => None,
        };
        Ok(self
            .store
            .shadow_history(id)?
            .into_iter()
            // A shadow at the live version is left over from a lost update.
            .filter(|(version, _)| live_version.map_or(true, |live| *version < live))
            .map(|(version, doc)| Revision::from_shadow(id, version, doc))
            .collect())
    }

    fn require(&self, id: &str) -> VersionedResult<Document> {
        self.store
            .get(id)?
            .ok_or_else(|| VersionedError::NotFound { id: id.to_string() })
    }
}

fn conflict(
    id: String,
    base: Document,
    current: Document,
    current_version: u64,
    base_version: u64,
) -> VersionedError {
    VersionedError::VersionConflict {
        id,
        base_version,
        current_version,
        base: Box::new(base),
        current: Box::new(current),
    }
}

impl std::fmt::Debug for VersionedDocuments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedDocuments").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn docs() -> VersionedDocuments {
        VersionedDocuments::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    #[test]
    fn insert_starts_at_version_one() {
        let d = docs();
        let stored = d.insert(doc(json!({"_id": "f1", "path": "/a"}))).unwrap();
        assert_eq!(stored["_version"], 1);
        assert_eq!(d.get("f1").unwrap().unwrap(), stored);
    }

    #[test]
    fn insert_rejects_versioned_and_duplicate_documents() {
        let d = docs();
        assert!(matches!(
            d.insert(doc(json!({"_id": "f1", "_version": 4}))),
            Err(VersionedError::InvalidDocument(_))
        ));
        assert!(matches!(
            d.insert(doc(json!({"path": "/no-id"}))),
            Err(VersionedError::InvalidDocument(_))
        ));
        d.insert(doc(json!({"_id": "f1"}))).unwrap();
        assert!(matches!(
            d.insert(doc(json!({"_id": "f1"}))),
            Err(VersionedError::AlreadyExists { id }) if id == "f1"
        ));
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    #[test]
    fn update_advances_by_one_and_shadows_previous() {
        let d = docs();
        let v1 = d.insert(doc(json!({"_id": "f1", "size": 1}))).unwrap();
        let mut next = v1.clone();
        next.insert("size".into(), json!(2));
        let v2 = d.update(next).unwrap();
        assert_eq!(v2["_version"], 2);
        assert_eq!(d.get("f1").unwrap().unwrap()["size"], 2);

        let history = d.history("f1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].document, v1);
    }

    #[test]
    fn concurrent_updates_from_same_base_conflict() {
        let d = docs();
        let base = d.insert(doc(json!({"_id": "f1", "owner": "x"}))).unwrap();

        let mut first = base.clone();
        first.insert("owner".into(), json!("ann"));
        let mut second = base.clone();
        second.insert("owner".into(), json!("bob"));

        d.update(first).unwrap();
        let err = d.update(second.clone()).unwrap_err();
        match err {
            VersionedError::VersionConflict {
                id,
                base_version,
                current_version,
                base,
                current,
            } => {
                assert_eq!(id, "f1");
                assert_eq!(base_version, 1);
                assert_eq!(current_version, 2);
                assert_eq!(*base, second);
                assert_eq!(current["owner"], "ann");
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
        let live = d.get("f1").unwrap().unwrap();
        assert_eq!(live["_version"], 2);
        assert_eq!(live["owner"], "ann");
    }

    #[test]
    fn lost_race_reports_conflict() {
        /// Store whose conditional replace always loses, as if another
        /// writer got in between the read and the swap.
        struct Racing {
            inner: InMemoryDocumentStore,
        }

        impl DocumentStore for Racing {
            fn get(&self, id: &str) -> VersionedResult<Option<Document>> {
                self.inner.get(id)
            }
            fn insert(&self, id: &str, doc: &Document) -> VersionedResult<bool> {
                self.inner.insert(id, doc)
            }
            fn replace_if_version(
                &self,
                id: &str,
                expected: u64,
                doc: &Document,
            ) -> VersionedResult<bool> {
                let mut winner = doc.clone();
                winner.insert("owner".into(), json!("winner"));
                self.inner.replace_if_version(id, expected, &winner)?;
                Ok(false)
            }
            fn delete_if_version(&self, id: &str, expected: u64) -> VersionedResult<bool> {
                self.inner.delete_if_version(id, expected)
            }
            fn put_shadow(&self, id: &str, version: u64, doc: &Document) -> VersionedResult<()> {
                self.inner.put_shadow(id, version, doc)
            }
            fn shadow_history(&self, id: &str) -> VersionedResult<Vec<(u64, Document)>> {
                self.inner.shadow_history(id)
            }
        }

        let d = VersionedDocuments::new(Arc::new(Racing {
            inner: InMemoryDocumentStore::new(),
        }));
        let base = d.insert(doc(json!({"_id": "f1"}))).unwrap();
        let err = d.update(base).unwrap_err();
        assert!(matches!(
            err,
            VersionedError::VersionConflict { base_version: 1, current_version: 2, ref current, .. }
                if current["owner"] == "winner"
        ));
    }

    #[test]
    fn remove_racing_an_update_conflicts() {
        /// Store where an update from another writer lands between the
        /// remove's read and its conditional delete.
        struct UpdatedUnderneath {
            inner: InMemoryDocumentStore,
        }

        impl DocumentStore for UpdatedUnderneath {
            fn get(&self, id: &str) -> VersionedResult<Option<Document>> {
                self.inner.get(id)
            }
            fn insert(&self, id: &str, doc: &Document) -> VersionedResult<bool> {
                self.inner.insert(id, doc)
            }
            fn replace_if_version(
                &self,
                id: &str,
                expected: u64,
                doc: &Document,
            ) -> VersionedResult<bool> {
                self.inner.replace_if_version(id, expected, doc)
            }
            fn delete_if_version(&self, id: &str, expected: u64) -> VersionedResult<bool> {
                let winner = doc(json!({"_id": id, "_version": expected + 1, "owner": "winner"}));
                self.inner.replace_if_version(id, expected, &winner)?;
                self.inner.delete_if_version(id, expected)
            }
            fn put_shadow(&self, id: &str, version: u64, doc: &Document) -> VersionedResult<()> {
                self.inner.put_shadow(id, version, doc)
            }
            fn shadow_history(&self, id: &str) -> VersionedResult<Vec<(u64, Document)>> {
                self.inner.shadow_history(id)
            }
        }

        let d = VersionedDocuments::new(Arc::new(UpdatedUnderneath {
            inner: InMemoryDocumentStore::new(),
        }));
        let v1 = d.insert(doc(json!({"_id": "f1", "owner": "ann"}))).unwrap();
        let err = d.remove("f1", doc(json!({"deletedBy": "bob"}))).unwrap_err();
        match err {
            VersionedError::VersionConflict {
                base_version,
                current_version,
                base,
                current,
                ..
            } => {
                assert_eq!(base_version, 1);
                assert_eq!(current_version, 2);
                assert_eq!(*base, v1);
                assert_eq!(current["owner"], "winner");
            }
            other => panic!("expected a conflict, got {other:?}"),
        }

        // The update survives and the unused deletion marker stays hidden.
        let live = d.get("f1").unwrap().unwrap();
        assert_eq!(live["owner"], "winner");
        let history = d.history("f1").unwrap();
        let versions: Vec<(u64, bool)> = history.iter().map(|r| (r.version, r.deleted)).collect();
        assert_eq!(versions, vec![(1, false)]);

        // The next update overwrites the stale marker with the real revision.
        d.update(live.clone()).unwrap();
        let history = d.history("f1").unwrap();
        let versions: Vec<(u64, bool)> = history.iter().map(|r| (r.version, r.deleted)).collect();
        assert_eq!(versions, vec![(1, false), (2, false)]);
        assert_eq!(history[1].document["owner"], "winner");
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let d = docs();
        assert!(matches!(
            d.update(doc(json!({"_id": "ghost", "_version": 1}))),
            Err(VersionedError::NotFound { .. })
        ));
        assert!(matches!(
            d.update(doc(json!({"_id": "ghost"}))),
            Err(VersionedError::InvalidDocument(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Remove and history
    // -----------------------------------------------------------------------

    #[test]
    fn remove_leaves_history_and_marker() {
        let d = docs();
        let v1 = d.insert(doc(json!({"_id": "f1", "path": "/a"}))).unwrap();
        let v2 = d.update(v1.clone()).unwrap();
        d.remove("f1", doc(json!({"deletedBy": "ann"}))).unwrap();

        assert!(d.get("f1").unwrap().is_none());
        let history = d.history("f1").unwrap();
        let versions: Vec<(u64, bool)> = history.iter().map(|r| (r.version, r.deleted)).collect();
        assert_eq!(versions, vec![(1, false), (2, false), (3, true)]);
        assert_eq!(history[1].document, v2);
        assert_eq!(history[2].document["_version"], "deleted:2");
        assert_eq!(history[2].document["deletedBy"], "ann");
        assert_eq!(history[2].document["_id"], "f1");
    }

    #[test]
    fn remove_missing_document_is_not_found() {
        let d = docs();
        assert!(matches!(
            d.remove("ghost", Document::new()),
            Err(VersionedError::NotFound { .. })
        ));
    }

    #[test]
    fn history_of_unknown_id_is_empty() {
        assert!(docs().history("nothing").unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn versions_advance_one_per_update(updates in 0usize..20) {
            let d = docs();
            let mut current = d.insert(doc(json!({"_id": "p", "n": 0}))).unwrap();
            for n in 1..=updates {
                current.insert("n".into(), json!(n));
                current = d.update(current).unwrap();
            }
            prop_assert_eq!(&current["_version"], &json!(updates as u64 + 1));
            let history = d.history("p").unwrap();
            prop_assert_eq!(history.len(), updates);
            for (i, revision) in history.iter().enumerate() {
                prop_assert_eq!(revision.version, i as u64 + 1);
                prop_assert_eq!(&revision.document["n"], &json!(i));
            }
        }
    }
}
