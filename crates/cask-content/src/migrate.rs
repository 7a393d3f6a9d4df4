//! Moving blob payloads into an external blob store.

use cask_crypto::HashingReader;
use cask_store::{BlobStore, Scheme};
use cask_types::ContentId;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ContentError, ContentResult};
use crate::store::ContentStore;

/// Outcome of a migration batch.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Ids moved, with their new external key.
    pub migrated: Vec<(ContentId, String)>,
    /// Ids whose primary scheme holds no local blob.
    pub skipped: Vec<ContentId>,
    pub failures: Vec<MigrationFailure>,
}

/// One id that could not be migrated.
#[derive(Debug)]
pub struct MigrationFailure {
    pub id: ContentId,
    pub error: ContentError,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl ContentStore {
    /// Move the `raw` and `gz` payloads of `ids` into the external store.
    ///
    /// Each payload is decoded, copied under a fresh key and verified
    /// against its id before the record's primary scheme is swapped to the
    /// external reference and the local blob is deleted. Failures are
    /// collected per id; the batch continues past them.
    pub fn migrate_to_external(&self, ids: &[ContentId]) -> ContentResult<MigrationReport> {
        let external = self
            .backends
            .external
            .clone()
            .ok_or(ContentError::NoExternalStore)?;
        let mut report = MigrationReport::default();
        for id in ids {
            match self.migrate_one(external.as_ref(), id) {
                Ok(Some(key)) => report.migrated.push((*id, key)),
                Ok(None) => report.skipped.push(*id),
                Err(error) => {
                    warn!(id = %id, error = %error, "migration failed");
                    report.failures.push(MigrationFailure { id: *id, error });
                }
            }
        }
        info!(
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "migration finished"
        );
        Ok(report)
    }

    fn migrate_one(&self, external: &dyn BlobStore, id: &ContentId) -> ContentResult<Option<String>> {
        let record = self.backends.require(id)?;
        let Some(local_key) = record.scheme.local_blob_key(id) else {
            return Ok(None);
        };

        let key = Uuid::now_v7().to_string();
        let stream = self
            .backends
            .open_scheme(&record, &record.scheme, 0, record.length, 0)?;
        let mut hashing = HashingReader::new(stream);
        let copied = external.put(&key, &mut hashing);
        let (_, digest, length) = hashing.finish();
        if let Err(e) = copied {
            external.delete(&key)?;
            return Err(e.into());
        }
        if digest != *id {
            external.delete(&key)?;
            return Err(ContentError::DigestMismatch {
                id: *id,
                actual: digest,
            });
        }

        let replacement = Scheme::External { key: key.clone() };
        if !self
            .backends
            .records
            .replace_scheme(id, &record.scheme, &replacement)?
        {
            external.delete(&key)?;
            return Err(ContentError::Modified(*id));
        }
        self.backends.blobs.delete(&local_key)?;
        info!(id = %id, key = %key, length, "migrated content to external store");
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cask_store::{raw_blob_key, InMemoryBlobStore, InMemoryRecordStore};
    use cask_types::ContentPointer;

    use super::*;
    use crate::config::StoreConfig;

    fn store_with_external() -> (ContentStore, Arc<InMemoryBlobStore>) {
        let external = Arc::new(InMemoryBlobStore::new());
        let store = ContentStore::new(
            StoreConfig::default(),
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        )
        .unwrap()
        .with_external(external.clone());
        (store, external)
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x9e37_79b9u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn raw_and_gzip_payloads_move() {
        let (store, external) = store_with_external();
        let raw = noise(5000);
        let text = b"migrate me please ".repeat(100);
        let a = store.store_bytes(&raw).unwrap();
        let b = store.store_bytes(&text).unwrap();
        let inline = store.store_bytes(b"small").unwrap();

        let report = store.migrate_to_external(&[a.sha, b.sha, inline.sha]).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.migrated.len(), 2);
        assert_eq!(report.skipped, vec![inline.sha]);

        assert!(store.blobs().keys().unwrap().is_empty());
        assert_eq!(external.len(), 2);
        let record = store.record(&a.sha).unwrap().unwrap();
        assert!(matches!(record.scheme, Scheme::External { .. }));

        assert_eq!(store.read_all(&ContentPointer::from(a)).unwrap(), raw);
        assert_eq!(store.read_all(&ContentPointer::from(b)).unwrap(), text);
        // Decoded bytes are stored externally, not the gzip payload.
        let key = &report.migrated[1].1;
        assert_eq!(external.size(key).unwrap(), Some(text.len() as u64));
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let (store, external) = store_with_external();
        let lost = store.store_bytes(&noise(1000)).unwrap();
        let kept = store.store_bytes(&noise(2000)).unwrap();
        store.blobs().delete(&raw_blob_key(&lost.sha)).unwrap();
        let missing = ContentId::digest(b"missing");

        let report = store
            .migrate_to_external(&[lost.sha, missing, kept.sha])
            .unwrap();
        assert_eq!(report.migrated.len(), 1);
        assert_eq!(report.migrated[0].0, kept.sha);
        let failed: Vec<ContentId> = report.failures.iter().map(|f| f.id).collect();
        assert_eq!(failed, vec![lost.sha, missing]);
        assert!(matches!(report.failures[1].error, ContentError::NotFound(_)));
        // The failed copy left nothing behind.
        assert_eq!(external.len(), 1);
        assert_eq!(store.record(&lost.sha).unwrap().unwrap().scheme, Scheme::Raw);
    }

    #[test]
    fn requires_external_store() {
        let store = ContentStore::in_memory();
        let err = store.migrate_to_external(&[]).unwrap_err();
        assert!(matches!(err, ContentError::NoExternalStore));
    }
}
