//! The [`DocumentStore`] trait: the primitives versioning is built on.

use crate::document::Document;
use crate::error::VersionedResult;

/// Storage backend for live documents and their shadow history.
///
/// Every method is atomic on a single document or shadow entry. The
/// conditional methods are compare-and-swap on the live `_version` field,
/// which is what makes concurrent writers across processes safe.
pub trait DocumentStore: Send + Sync {
    /// Read a live document. Returns `Ok(None)` if it does not exist.
    fn get(&self, id: &str) -> VersionedResult<Option<Document>>;

    /// Insert a live document unless one with the same id exists.
    ///
    /// Returns `true` if this call created it.
    fn insert(&self, id: &str, doc: &Document) -> VersionedResult<bool>;

    /// Replace a live document iff its `_version` still equals `expected`.
    fn replace_if_version(&self, id: &str, expected: u64, doc: &Document)
        -> VersionedResult<bool>;

    /// Delete a live document iff its `_version` still equals `expected`.
    fn delete_if_version(&self, id: &str, expected: u64) -> VersionedResult<bool>;

    /// Write the shadow entry for `(id, version)`, replacing any existing one.
    fn put_shadow(&self, id: &str, version: u64, doc: &Document) -> VersionedResult<()>;

    /// Shadow entries of `id` as stored, ordered by version.
    fn shadow_history(&self, id: &str) -> VersionedResult<Vec<(u64, Document)>>;
}
