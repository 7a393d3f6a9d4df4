use std::io::Read;
use std::sync::Arc;

use cask_content::{ByteStream, ConcatPiece, Content, ContentStore, StoreConfig};
use cask_refs::{
    Collector, GcReport, InMemoryReferenceStore, RefError, ReferenceRecord, ReferenceStore,
    ReferenceTracker,
};
use cask_store::{BlobStore, RecordStore};
use cask_types::{ContentPointer, StoredPointer};
use cask_versioned::{
    Document, DocumentStore, InMemoryDocumentStore, Revision, VersionedDocuments,
};
use tracing::debug;

use crate::error::SdkResult;

/// High-level Cask API.
///
/// Bundles the content store, the reference tracker, the collector and the
/// owner documents over shared backends, so the collector sweeps exactly
/// the records and blobs the content store writes.
pub struct Cask {
    content: ContentStore,
    tracker: ReferenceTracker,
    collector: Collector,
    documents: VersionedDocuments,
}

impl Cask {
    /// Assemble a Cask over caller-provided backends.
    pub fn new(
        config: StoreConfig,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        references: Arc<dyn ReferenceStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> SdkResult<Self> {
        let content = ContentStore::new(config, records.clone(), blobs.clone())?;
        Ok(Self {
            content,
            tracker: ReferenceTracker::new(references.clone()),
            collector: Collector::new(references, records, blobs),
            documents: VersionedDocuments::new(documents),
        })
    }

    /// A Cask over fresh in-memory backends with default settings.
    pub fn in_memory() -> Self {
        let content = ContentStore::in_memory();
        let references: Arc<dyn ReferenceStore> = Arc::new(InMemoryReferenceStore::new());
        let collector = Collector::new(
            references.clone(),
            content.records().clone(),
            content.blobs().clone(),
        );
        Self {
            content,
            tracker: ReferenceTracker::new(references),
            collector,
            documents: VersionedDocuments::new(Arc::new(InMemoryDocumentStore::new())),
        }
    }

    /// Attach an external blob store for migration, reads and collection.
    pub fn with_external(mut self, external: Arc<dyn BlobStore>) -> Self {
        self.content = self.content.with_external(external.clone());
        self.collector = self.collector.with_external(external);
        self
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn tracker(&self) -> &ReferenceTracker {
        &self.tracker
    }

    pub fn documents(&self) -> &VersionedDocuments {
        &self.documents
    }

    // ---- Content operations ----

    pub fn store_content(&self, reader: &mut dyn Read) -> SdkResult<StoredPointer> {
        Ok(self.content.store_content(reader)?)
    }

    pub fn store_bytes(&self, data: &[u8]) -> SdkResult<StoredPointer> {
        Ok(self.content.store_bytes(data)?)
    }

    pub fn get_content(&self, pointer: &ContentPointer) -> SdkResult<ByteStream> {
        Ok(self.content.get_content(pointer)?)
    }

    pub fn read_all(&self, pointer: &ContentPointer) -> SdkResult<Vec<u8>> {
        Ok(self.content.read_all(pointer)?)
    }

    pub fn concatenate(
        &self,
        pieces: impl IntoIterator<Item = ConcatPiece>,
    ) -> SdkResult<ContentPointer> {
        Ok(self.content.calculate_concatenation(pieces)?)
    }

    /// Resolve a hex digest prefix to stored content.
    pub fn find_by_prefix(&self, prefix: &str) -> SdkResult<Option<Content>> {
        Ok(self.content.find_by_hex_prefix(prefix)?)
    }

    // ---- Reference operations ----

    pub fn update_references(
        &self,
        owner: &str,
        pointers: &[ContentPointer],
    ) -> SdkResult<ReferenceRecord> {
        Ok(self.tracker.update_references(owner, pointers)?)
    }

    pub fn purge(&self, owner: &str) -> SdkResult<()> {
        Ok(self.tracker.purge(owner)?)
    }

    /// Remove an owner document and mark its content for collection.
    pub fn delete_owner(&self, id: &str, extra: Document) -> SdkResult<()> {
        self.documents.remove(id, extra)?;
        match self.tracker.purge(id) {
            // An owner that never referenced content has nothing to purge.
            Ok(()) | Err(RefError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        debug!(owner = id, "owner deleted");
        Ok(())
    }

    pub fn gc_sweep(&self) -> SdkResult<GcReport> {
        Ok(self.collector.sweep()?)
    }

    // ---- Document operations ----

    pub fn insert(&self, doc: Document) -> SdkResult<Document> {
        Ok(self.documents.insert(doc)?)
    }

    pub fn update(&self, doc: Document) -> SdkResult<Document> {
        Ok(self.documents.update(doc)?)
    }

    pub fn remove(&self, id: &str, extra: Document) -> SdkResult<()> {
        Ok(self.documents.remove(id, extra)?)
    }

    pub fn get_document(&self, id: &str) -> SdkResult<Option<Document>> {
        Ok(self.documents.get(id)?)
    }

    pub fn history(&self, id: &str) -> SdkResult<Vec<Revision>> {
        Ok(self.documents.history(id)?)
    }
}

impl std::fmt::Debug for Cask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cask")
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}
