use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor, Read};
use std::sync::RwLock;

use bytes::Bytes;
use cask_types::ContentId;

use crate::error::{StoreError, StoreResult};
use crate::record::{ContentRecord, Scheme};
use crate::traits::{validate_blob_key, BlobStore, RecordStore};

/// In-memory, ordered record store.
///
/// Intended for tests and embedding. Records live in a `BTreeMap` behind a
/// `RwLock`, so range queries come back in id order and every mutator runs
/// under a single write lock.
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<ContentId, ContentRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }

    fn update<T>(
        &self,
        id: &ContentId,
        f: impl FnOnce(&mut ContentRecord) -> T,
    ) -> StoreResult<T> {
        let mut map = self.records.write().expect("lock poisoned");
        let record = map.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        Ok(f(record))
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, id: &ContentId) -> StoreResult<Option<ContentRecord>> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    fn insert(&self, record: &ContentRecord) -> StoreResult<bool> {
        let mut map = self.records.write().expect("lock poisoned");
        if map.contains_key(&record.id) {
            return Ok(false);
        }
        map.insert(record.id, record.clone());
        Ok(true)
    }

    fn range(&self, from: &ContentId, to: &ContentId, limit: usize) -> StoreResult<Vec<ContentId>> {
        if from > to {
            return Ok(Vec::new());
        }
        let map = self.records.read().expect("lock poisoned");
        Ok(map.range(*from..=*to).map(|(id, _)| *id).take(limit).collect())
    }

    fn add_alt(&self, id: &ContentId, scheme: &Scheme) -> StoreResult<bool> {
        self.update(id, |record| {
            if record.has_scheme(scheme) {
                false
            } else {
                record.alt.push(scheme.clone());
                true
            }
        })
    }

    fn add_ref_base(&self, id: &ContentId, composite: &ContentId) -> StoreResult<()> {
        self.update(id, |record| {
            record.ref_base.insert(*composite);
        })
    }

    fn add_owner(&self, id: &ContentId, owner: &str) -> StoreResult<()> {
        self.update(id, |record| {
            record.owners.insert(owner.to_string());
            record.owner_history.insert(owner.to_string());
        })
    }

    fn remove_owner(&self, id: &ContentId, owner: &str) -> StoreResult<bool> {
        self.update(id, |record| record.owners.remove(owner))
    }

    fn replace_scheme(
        &self,
        id: &ContentId,
        expected: &Scheme,
        replacement: &Scheme,
    ) -> StoreResult<bool> {
        self.update(id, |record| {
            if &record.scheme != expected {
                return false;
            }
            record.scheme = replacement.clone();
            record.alt.retain(|s| s != replacement);
            true
        })
    }

    fn delete(&self, id: &ContentId) -> StoreResult<bool> {
        let mut map = self.records.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    fn ids(&self) -> StoreResult<Vec<ContentId>> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("record_count", &self.len())
            .finish()
    }
}

/// In-memory blob store keyed by string.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        validate_blob_key(key)?;
        let mut data = Vec::new();
        io::copy(reader, &mut data)?;
        let written = data.len() as u64;
        let mut map = self.blobs.write().expect("lock poisoned");
        map.insert(key.to_string(), Bytes::from(data));
        Ok(written)
    }

    fn open(&self, key: &str, offset: u64) -> StoreResult<Box<dyn Read + Send>> {
        let map = self.blobs.read().expect("lock poisoned");
        let data = map
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(key.to_string()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        Ok(Box::new(Cursor::new(data.slice(start..))))
    }

    fn size(&self, key: &str) -> StoreResult<Option<u64>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(key).map(|b| b.len() as u64))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
