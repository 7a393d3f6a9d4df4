//! In-memory document store for testing and ephemeral use.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::document::{shadow_key, Document, ID_FIELD, VERSION_FIELD};
use crate::error::VersionedResult;
use crate::traits::DocumentStore;

/// An in-memory implementation of [`DocumentStore`].
///
/// Shadow entries are keyed by `(id, version)` so history reads are
/// ordered. Data is lost when the store is dropped.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    live: RwLock<BTreeMap<String, Document>>,
    shadow: RwLock<BTreeMap<(String, u64), Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.live.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.read().expect("lock poisoned").is_empty()
    }
}

fn version_of(doc: &Document) -> Option<u64> {
    doc.get(VERSION_FIELD).and_then(Value::as_u64)
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, id: &str) -> VersionedResult<Option<Document>> {
        Ok(self.live.read().expect("lock poisoned").get(id).cloned())
    }

    fn insert(&self, id: &str, doc: &Document) -> VersionedResult<bool> {
        let mut live = self.live.write().expect("lock poisoned");
        if live.contains_key(id) {
            return Ok(false);
        }
        live.insert(id.to_string(), doc.clone());
        Ok(true)
    }

    fn replace_if_version(
        &self,
        id: &str,
        expected: u64,
        doc: &Document,
    ) -> VersionedResult<bool> {
        let mut live = self.live.write().expect("lock poisoned");
        match live.get_mut(id) {
            Some(current) if version_of(current) == Some(expected) => {
                *current = doc.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_if_version(&self, id: &str, expected: u64) -> VersionedResult<bool> {
        let mut live = self.live.write().expect("lock poisoned");
        if live.get(id).and_then(version_of) == Some(expected) {
            live.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    fn put_shadow(&self, id: &str, version: u64, doc: &Document) -> VersionedResult<()> {
        let mut entry = doc.clone();
        entry.insert(ID_FIELD.to_string(), shadow_key(id, version));
        self.shadow
            .write()
            .expect("lock poisoned")
            .insert((id.to_string(), version), entry);
        Ok(())
    }

    fn shadow_history(&self, id: &str) -> VersionedResult<Vec<(u64, Document)>> {
        let shadow = self.shadow.read().expect("lock poisoned");
        Ok(shadow
            .range((id.to_string(), 0)..=(id.to_string(), u64::MAX))
            .map(|((_, version), doc)| (*version, doc.clone()))
            .collect())
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("live", &self.len())
            .field("shadow", &self.shadow.read().expect("lock poisoned").len())
            .finish()
    }
}
