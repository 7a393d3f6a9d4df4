use std::io::Read;

use cask_types::ContentId;

use crate::error::{StoreError, StoreResult};
use crate::record::{ContentRecord, Scheme};

/// Digest-keyed store of content records.
///
/// All implementations must satisfy these invariants:
/// - Inserting an id that already exists leaves the existing record alone
///   (content addressing guarantees both describe the same bytes).
/// - Every mutator is atomic per record; no operation spans records.
/// - Set-valued fields (`alt`, owners, `ref_base`) only grow, except
///   through `remove_owner` and `delete`.
/// - All I/O errors are propagated, never silently ignored.
pub trait RecordStore: Send + Sync {
    /// Read a record by id. Returns `Ok(None)` if it does not exist.
    fn get(&self, id: &ContentId) -> StoreResult<Option<ContentRecord>>;

    /// Insert a record unless one with the same id exists.
    ///
    /// Returns `true` if this call created the record.
    fn insert(&self, record: &ContentRecord) -> StoreResult<bool>;

    /// Ids in the inclusive range `[from, to]`, ascending, at most `limit`.
    fn range(&self, from: &ContentId, to: &ContentId, limit: usize) -> StoreResult<Vec<ContentId>>;

    /// Append an alternative representation.
    ///
    /// Returns `false` if the record already lists an equal scheme.
    /// Fails with `NotFound` if the record does not exist.
    fn add_alt(&self, id: &ContentId, scheme: &Scheme) -> StoreResult<bool>;

    /// Record that `composite` uses `id` as a piece.
    ///
    /// Fails with `NotFound` if the base record does not exist.
    fn add_ref_base(&self, id: &ContentId, composite: &ContentId) -> StoreResult<()>;

    /// Add `owner` to the record's owners and owner history.
    fn add_owner(&self, id: &ContentId, owner: &str) -> StoreResult<()>;

    /// Remove `owner` from the record's current owners. History is kept.
    fn remove_owner(&self, id: &ContentId, owner: &str) -> StoreResult<bool>;

    /// Replace the primary scheme iff it still equals `expected`.
    ///
    /// Returns `false` if the record changed underneath the caller.
    fn replace_scheme(
        &self,
        id: &ContentId,
        expected: &Scheme,
        replacement: &Scheme,
    ) -> StoreResult<bool>;

    /// Delete a record. Returns `true` if it existed.
    ///
    /// Intended for garbage collection only.
    fn delete(&self, id: &ContentId) -> StoreResult<bool>;

    /// All record ids, ascending.
    fn ids(&self) -> StoreResult<Vec<ContentId>>;

    /// Check whether a record exists.
    fn exists(&self, id: &ContentId) -> StoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Read a record that must exist.
    fn require(&self, id: &ContentId) -> StoreResult<ContentRecord> {
        self.get(id)?.ok_or(StoreError::NotFound(*id))
    }
}

/// Store of streamed payloads keyed by string.
///
/// Keys are restricted by [`validate_blob_key`]. Writing an existing key
/// replaces its payload.
pub trait BlobStore: Send + Sync {
    /// Stream `reader` to EOF into the blob `key`, returning the byte count.
    fn put(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64>;

    /// Open the blob `key` positioned `offset` bytes in.
    ///
    /// Fails with `BlobNotFound` if the key does not exist.
    fn open(&self, key: &str, offset: u64) -> StoreResult<Box<dyn Read + Send>>;

    /// Size of the blob in bytes, or `None` if it does not exist.
    fn size(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Delete the blob. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All keys, ascending.
    fn keys(&self) -> StoreResult<Vec<String>>;

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.size(key)?.is_some())
    }
}

const MAX_KEY_LEN: usize = 255;

/// Blob keys are 1..=255 ASCII characters from `[A-Za-z0-9._-]` and do not
/// start with a dot.
pub fn validate_blob_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
