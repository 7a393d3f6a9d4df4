use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use cask_codec::{gzip_stream, try_deflate, try_gzip};
use cask_crypto::{ContentHasher, HashingWriter};
use cask_store::{
    gzip_blob_key, raw_blob_key, BlobStore, ContentRecord, InMemoryBlobStore, InMemoryRecordStore,
    Piece, RecordStore, Scheme, StoreError,
};
use cask_types::{ContentId, ContentPointer, StoredPointer};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{ContentError, ContentResult};
use crate::read::{Backends, ByteStream, Content};
use crate::spool::{Spool, SpoolWriter};

/// Advisory metadata attached to a record by its first writer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentMeta {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl ContentMeta {
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Content-addressed store over a record store and a blob store.
///
/// Writes choose a representation per input (inline, deflated inline, gzip
/// blob, chunked concatenation or raw blob) and deduplicate by digest.
/// Reads decode any representation, falling back to alternatives.
pub struct ContentStore {
    pub(crate) config: StoreConfig,
    pub(crate) backends: Backends,
}

impl ContentStore {
    /// Create a store over the given backends.
    pub fn new(
        config: StoreConfig,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> ContentResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backends: Backends {
                records,
                blobs,
                external: None,
            },
        })
    }

    /// Attach an external blob store for `ext` records and migration.
    pub fn with_external(mut self, external: Arc<dyn BlobStore>) -> Self {
        self.backends.external = Some(external);
        self
    }

    /// A store over fresh in-memory backends with default settings.
    pub fn in_memory() -> Self {
        Self {
            config: StoreConfig::default(),
            backends: Backends {
                records: Arc::new(InMemoryRecordStore::new()),
                blobs: Arc::new(InMemoryBlobStore::new()),
                external: None,
            },
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.backends.records
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.backends.blobs
    }

    pub fn external(&self) -> Option<&Arc<dyn BlobStore>> {
        self.backends.external.as_ref()
    }

    /// Look up a record by id.
    pub fn record(&self, id: &ContentId) -> ContentResult<Option<ContentRecord>> {
        Ok(self.backends.records.get(id)?)
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Store everything `reader` yields.
    pub fn store_content(&self, reader: &mut dyn Read) -> ContentResult<StoredPointer> {
        self.store_content_with(reader, ContentMeta::default())
    }

    /// Store an in-memory byte slice.
    pub fn store_bytes(&self, data: &[u8]) -> ContentResult<StoredPointer> {
        self.store_content(&mut &data[..])
    }

    /// Store everything `reader` yields, recording `meta` if this call
    /// creates the record.
    ///
    /// The input is hashed while it is spooled, so the representation is
    /// chosen after a single pass. Existing content is never rewritten.
    pub fn store_content_with(
        &self,
        reader: &mut dyn Read,
        meta: ContentMeta,
    ) -> ContentResult<StoredPointer> {
        let mut spool = SpoolWriter::new(self.config.spool_threshold);
        let mut hashing = HashingWriter::new(&mut spool);
        io::copy(reader, &mut hashing).map_err(ContentError::from_io)?;
        let (_, id, length) = hashing.finish();
        let spool = spool.finish()?;

        if self.backends.records.exists(&id)? {
            debug!(id = %id, length, "content already stored");
            return Ok(StoredPointer::new(id, length));
        }

        let scheme = if length <= self.config.inline_threshold {
            let data = spool.to_bytes()?;
            match try_deflate(&data, data.len()) {
                Some(compressed) => Scheme::InlineDeflated(Bytes::from(compressed)),
                None => Scheme::InlineRaw(data),
            }
        } else if self.put_gzip(&id, length, &spool)? {
            Scheme::Gzip
        } else if length > self.config.chunk_size {
            return self.store_chunked(id, length, &spool, meta);
        } else {
            self.backends
                .blobs
                .put(&raw_blob_key(&id), &mut spool.reader()?)?;
            Scheme::Raw
        };

        debug!(id = %id, length, scheme = scheme.label(), "stored content");
        let record = ContentRecord::new(id, length, scheme).with_meta(meta.filename, meta.content_type);
        self.backends.records.insert(&record)?;
        Ok(StoredPointer::new(id, length))
    }

    /// Write the gzip form of `spool` if it saves more than the configured
    /// overhead. Returns whether the blob was written.
    fn put_gzip(&self, id: &ContentId, length: u64, spool: &Spool) -> ContentResult<bool> {
        let limit = length.saturating_sub(self.config.gzip_overhead);
        let key = gzip_blob_key(id);
        if let Some(data) = spool.as_bytes() {
            return match try_gzip(data) {
                Some(compressed) if (compressed.len() as u64) < limit => {
                    self.backends.blobs.put(&key, &mut &compressed[..])?;
                    Ok(true)
                }
                _ => Ok(false),
            };
        }

        let mut out = SpoolWriter::new(self.config.spool_threshold);
        let compressed = gzip_stream(&mut spool.reader()?, &mut out)?;
        if compressed >= limit {
            return Ok(false);
        }
        let compressed = out.finish()?;
        self.backends.blobs.put(&key, &mut compressed.reader()?)?;
        Ok(true)
    }

    /// Store `spool` as a concatenation of independently stored chunks.
    fn store_chunked(
        &self,
        id: ContentId,
        length: u64,
        spool: &Spool,
        meta: ContentMeta,
    ) -> ContentResult<StoredPointer> {
        let mut reader = spool.reader()?;
        let mut pieces = Vec::new();
        loop {
            let mut chunk = Vec::new();
            (&mut reader)
                .take(self.config.chunk_size)
                .read_to_end(&mut chunk)?;
            if chunk.is_empty() {
                break;
            }
            let stored = self.store_bytes(&chunk)?;
            pieces.push(Piece::Base {
                id: stored.sha,
                offset: 0,
                length: stored.length,
            });
        }
        debug!(id = %id, length, chunks = pieces.len(), "stored chunked content");
        self.persist_composite(id, length, Scheme::Concatenation(pieces), meta)
    }

    /// Insert a composite record after registering it on each base.
    ///
    /// Bases learn about the composite before the composite exists, so a
    /// failure in between leaves a dangling `ref_base` entry rather than a
    /// composite with a missing base.
    pub(crate) fn persist_composite(
        &self,
        id: ContentId,
        length: u64,
        scheme: Scheme,
        meta: ContentMeta,
    ) -> ContentResult<StoredPointer> {
        self.register_on_bases(&id, &scheme)?;
        let record = ContentRecord::new(id, length, scheme).with_meta(meta.filename, meta.content_type);
        self.backends.records.insert(&record)?;
        Ok(StoredPointer::new(id, length))
    }

    fn register_on_bases(&self, id: &ContentId, scheme: &Scheme) -> ContentResult<()> {
        for base in scheme.base_ids() {
            match self.backends.records.add_ref_base(&base, id) {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    return Err(ContentError::ReferentialIntegrity(format!(
                        "base content {base} of {id} does not exist"
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Resolve a pointer to readable content.
    ///
    /// A stored pointer may name a prefix of its record; one longer than the
    /// record is an error.
    pub fn open(&self, pointer: &ContentPointer) -> ContentResult<Content> {
        match pointer {
            ContentPointer::Inline(inline) => {
                Ok(Content::inline(self.backends.clone(), inline.clone()))
            }
            ContentPointer::Stored(stored) => {
                let record = self.backends.require(&stored.sha)?;
                if stored.length > record.length {
                    return Err(ContentError::InvalidRange {
                        id: stored.sha,
                        offset: 0,
                        length: stored.length,
                        available: record.length,
                    });
                }
                Ok(Content::stored(
                    self.backends.clone(),
                    stored.sha,
                    stored.length,
                ))
            }
        }
    }

    /// Stream the bytes a pointer designates.
    pub fn get_content(&self, pointer: &ContentPointer) -> ContentResult<ByteStream> {
        self.open(pointer)?.open()
    }

    /// Read the bytes a pointer designates into memory.
    pub fn read_all(&self, pointer: &ContentPointer) -> ContentResult<Vec<u8>> {
        self.open(pointer)?.read_all()
    }

    /// Digest of the bytes a pointer designates.
    ///
    /// Free for a stored pointer covering its whole record; otherwise the
    /// bytes are streamed and hashed.
    pub fn content_id(&self, pointer: &ContentPointer) -> ContentResult<ContentId> {
        if let ContentPointer::Stored(stored) = pointer {
            let record = self.backends.require(&stored.sha)?;
            if stored.length == record.length {
                return Ok(stored.sha);
            }
        }
        let mut stream = self.get_content(pointer)?;
        let (id, _) = ContentHasher::hash_reader(&mut stream).map_err(ContentError::from_io)?;
        Ok(id)
    }

    /// Whether two pointers designate the same bytes.
    pub fn content_eq(&self, a: &ContentPointer, b: &ContentPointer) -> ContentResult<bool> {
        if a.len() != b.len() {
            return Ok(false);
        }
        Ok(self.content_id(a)? == self.content_id(b)?)
    }

    /// Resolve the single stored id starting with `prefix`.
    ///
    /// Returns `None` when nothing matches and `AmbiguousPrefix` when more
    /// than one id does.
    pub fn find_by_prefix(&self, prefix: &[u8]) -> ContentResult<Option<Content>> {
        let (from, to) = ContentId::prefix_bounds(prefix)?;
        self.find_in_range(&from, &to, hex::encode(prefix))
    }

    /// [`find_by_prefix`](Self::find_by_prefix) for a hex prefix, which may
    /// have an odd number of digits.
    pub fn find_by_hex_prefix(&self, prefix: &str) -> ContentResult<Option<Content>> {
        let (from, to) = ContentId::hex_prefix_bounds(prefix)?;
        self.find_in_range(&from, &to, prefix.to_ascii_lowercase())
    }

    fn find_in_range(
        &self,
        from: &ContentId,
        to: &ContentId,
        prefix: String,
    ) -> ContentResult<Option<Content>> {
        let matches = self.backends.records.range(from, to, 2)?;
        match matches.as_slice() {
            [] => Ok(None),
            [id] => {
                let record = self.backends.require(id)?;
                Ok(Some(Content::stored(
                    self.backends.clone(),
                    *id,
                    record.length,
                )))
            }
            _ => Err(ContentError::AmbiguousPrefix { prefix, matches }),
        }
    }

    // -----------------------------------------------------------------------
    // Alternatives and owners
    // -----------------------------------------------------------------------

    /// Add a representation for content `id` of `length` bytes.
    ///
    /// Creates the record with `scheme` as primary when it does not exist,
    /// otherwise appends `scheme` to its alternatives. Bases named by a
    /// composite scheme must exist and are registered in `ref_base`. The
    /// scheme is trusted to decode to the bytes of `id`; it is not re-hashed.
    /// `owner`, when given, is added to the record's owners.
    pub fn register_alt(
        &self,
        id: ContentId,
        length: u64,
        scheme: Scheme,
        owner: Option<&str>,
    ) -> ContentResult<StoredPointer> {
        let declared = match &scheme {
            Scheme::Concatenation(pieces) => Some(pieces.iter().map(Piece::len).sum()),
            Scheme::ZipEntry { length, .. } => Some(*length),
            Scheme::InlineRaw(bytes) => Some(bytes.len() as u64),
            _ => None,
        };
        if let Some(actual) = declared.filter(|actual| *actual != length) {
            return Err(ContentError::LengthMismatch {
                id,
                expected: length,
                actual,
            });
        }
        for base in scheme.base_ids() {
            self.require_base(&base)?;
        }
        if let Some(existing) = self.backends.records.get(&id)? {
            if existing.length != length {
                return Err(ContentError::LengthMismatch {
                    id,
                    expected: existing.length,
                    actual: length,
                });
            }
        }

        self.register_on_bases(&id, &scheme)?;
        let record = ContentRecord::new(id, length, scheme.clone());
        if self.backends.records.insert(&record)? {
            debug!(id = %id, scheme = scheme.label(), "registered content");
        } else if self.backends.records.add_alt(&id, &scheme)? {
            debug!(id = %id, scheme = scheme.label(), "added alternative representation");
        }
        if let Some(owner) = owner {
            self.backends.records.add_owner(&id, owner)?;
        }
        Ok(StoredPointer::new(id, length))
    }

    /// Drop `owner` from the owners of content `id`.
    pub fn release_owner(&self, id: &ContentId, owner: &str) -> ContentResult<bool> {
        Ok(self.backends.records.remove_owner(id, owner)?)
    }

    /// Delete a record and the payloads it holds in either blob store.
    ///
    /// Composites that use the record as a base are not checked; callers
    /// outside garbage collection must know it is unused.
    pub fn remove_content(&self, id: &ContentId) -> ContentResult<bool> {
        let Some(record) = self.backends.records.get(id)? else {
            return Ok(false);
        };
        self.backends.records.delete(id)?;
        for key in record.local_blob_keys() {
            self.backends.blobs.delete(&key)?;
        }
        if let Some(external) = &self.backends.external {
            for key in record.external_keys() {
                external.delete(&key)?;
            }
        }
        info!(id = %id, length = record.length, "removed content");
        Ok(true)
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("config", &self.config)
            .field("external", &self.backends.external.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_types::InlinePointer;
    use proptest::prelude::*;

    fn small_store() -> ContentStore {
        let config = StoreConfig {
            inline_threshold: 16,
            chunk_size: 1024,
            spool_threshold: 512,
            ..StoreConfig::default()
        };
        ContentStore::new(
            config,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        )
        .unwrap()
    }

    fn noise(seed: u32, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 24) as u8
            })
            .collect()
    }

    fn primary(store: &ContentStore, id: &ContentId) -> Scheme {
        store.record(id).unwrap().unwrap().scheme
    }

    fn read(store: &ContentStore, p: StoredPointer) -> Vec<u8> {
        store.read_all(&p.into()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Representation selection
    // -----------------------------------------------------------------------

    #[test]
    fn tiny_incompressible_content_is_inline_raw() {
        let store = small_store();
        let p = store.store_bytes(b"abc").unwrap();
        assert_eq!(p.sha, ContentId::digest(b"abc"));
        assert_eq!(primary(&store, &p.sha), Scheme::InlineRaw(Bytes::from_static(b"abc")));
        assert_eq!(read(&store, p), b"abc");
    }

    #[test]
    fn small_compressible_content_is_inline_deflated() {
        let store = small_store();
        let data = [b'z'; 16];
        let p = store.store_bytes(&data).unwrap();
        assert!(matches!(primary(&store, &p.sha), Scheme::InlineDeflated(_)));
        assert_eq!(read(&store, p), data);
    }

    #[test]
    fn compressible_content_is_gzipped() {
        let store = small_store();
        let data = b"all work and no play ".repeat(40);
        let p = store.store_bytes(&data).unwrap();
        assert_eq!(primary(&store, &p.sha), Scheme::Gzip);
        assert!(store.blobs().exists(&gzip_blob_key(&p.sha)).unwrap());
        assert_eq!(read(&store, p), data);
    }

    #[test]
    fn incompressible_content_is_raw() {
        let store = small_store();
        let data = noise(1, 900);
        let p = store.store_bytes(&data).unwrap();
        assert_eq!(primary(&store, &p.sha), Scheme::Raw);
        assert_eq!(store.blobs().size(&raw_blob_key(&p.sha)).unwrap(), Some(900));
        assert_eq!(read(&store, p), data);
    }

    #[test]
    fn large_incompressible_content_is_chunked() {
        let store = small_store();
        let data = noise(2, 2500);
        let p = store.store_bytes(&data).unwrap();
        let Scheme::Concatenation(pieces) = primary(&store, &p.sha) else {
            panic!("expected chunked content");
        };
        let lengths: Vec<u64> = pieces.iter().map(Piece::len).collect();
        assert_eq!(lengths, vec![1024, 1024, 452]);
        for piece in &pieces {
            let base = piece.base_id().unwrap();
            assert!(store.record(&base).unwrap().unwrap().ref_base.contains(&p.sha));
        }
        assert_eq!(read(&store, p), data);
    }

    #[test]
    fn spooled_compressible_content_is_gzipped() {
        let store = small_store();
        // Larger than the spool threshold, so gzip runs from the temp file.
        let data = b"0123456789".repeat(300);
        let p = store.store_bytes(&data).unwrap();
        assert_eq!(primary(&store, &p.sha), Scheme::Gzip);
        assert_eq!(read(&store, p), data);
    }

    #[test]
    fn empty_content_is_stored_inline() {
        let store = small_store();
        let p = store.store_bytes(b"").unwrap();
        assert_eq!(p.length, 0);
        assert_eq!(read(&store, p), b"");
    }

    // -----------------------------------------------------------------------
    // Dedup and metadata
    // -----------------------------------------------------------------------

    #[test]
    fn identical_bytes_are_stored_once() {
        let store = small_store();
        let data = noise(3, 700);
        let a = store.store_bytes(&data).unwrap();
        let b = store.store_bytes(&data).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.records().ids().unwrap(), vec![a.sha]);
    }

    #[test]
    fn first_writer_metadata_wins() {
        let store = small_store();
        let first = ContentMeta::named("a.txt").with_content_type("text/plain");
        store.store_content_with(&mut &b"same"[..], first).unwrap();
        let p = store
            .store_content_with(&mut &b"same"[..], ContentMeta::named("b.txt"))
            .unwrap();
        let record = store.record(&p.sha).unwrap().unwrap();
        assert_eq!(record.filename.as_deref(), Some("a.txt"));
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    #[test]
    fn ranged_reads_on_every_representation() {
        let store = small_store();
        for data in [
            b"short".to_vec(),
            b"hello hello hello hello hello hello".repeat(10),
            noise(4, 800),
            noise(5, 3000),
        ] {
            let p = store.store_bytes(&data).unwrap();
            let content = store.open(&p.into()).unwrap();
            assert_eq!(content.length(), data.len() as u64);
            let start = data.len() / 3;
            let len = data.len() / 2;
            assert_eq!(
                content.read_range(start as u64, len as u64).unwrap(),
                &data[start..start + len]
            );
        }
    }

    #[test]
    fn reads_are_clamped_to_content() {
        let store = small_store();
        let p = store.store_bytes(&noise(6, 100)).unwrap();
        let content = store.open(&p.into()).unwrap();
        assert_eq!(content.read_range(90, 50).unwrap().len(), 10);
        assert!(content.read_range(200, 5).unwrap().is_empty());
    }

    #[test]
    fn inline_pointer_tiles_repetition() {
        let store = small_store();
        let p = InlinePointer::repeating(&b"abcde"[..], 10, 2).unwrap();
        assert_eq!(store.read_all(&p.into()).unwrap(), b"cdeabcdeab");
    }

    #[test]
    fn stored_pointer_may_name_a_prefix() {
        let store = small_store();
        let data = noise(7, 500);
        let p = store.store_bytes(&data).unwrap();
        let prefix = ContentPointer::stored(p.sha, 100);
        assert_eq!(store.read_all(&prefix).unwrap(), &data[..100]);
        assert_eq!(store.content_id(&prefix).unwrap(), ContentId::digest(&data[..100]));

        let too_long = ContentPointer::stored(p.sha, 501);
        assert!(matches!(
            store.open(&too_long).unwrap_err(),
            ContentError::InvalidRange { available: 500, .. }
        ));
    }

    #[test]
    fn missing_content_is_not_found() {
        let store = small_store();
        let id = ContentId::digest(b"absent");
        let err = store.open(&ContentPointer::stored(id, 1)).unwrap_err();
        assert!(matches!(err, ContentError::NotFound(got) if got == id));
    }

    #[test]
    fn missing_blob_is_reported() {
        let store = small_store();
        let p = store.store_bytes(&noise(8, 600)).unwrap();
        store.blobs().delete(&raw_blob_key(&p.sha)).unwrap();
        assert!(store.read_all(&p.into()).is_err());
    }

    #[test]
    fn content_eq_compares_bytes_across_pointer_kinds() {
        let store = small_store();
        let stored = store.store_bytes(b"abcabcabcabc").unwrap();
        let inline = InlinePointer::repeating(&b"abc"[..], 12, 0).unwrap();
        assert!(store.content_eq(&stored.into(), &inline.into()).unwrap());
        assert!(!store
            .content_eq(&stored.into(), &ContentPointer::inline(&b"abcabcabcabd"[..]))
            .unwrap());
        assert!(!store
            .content_eq(&stored.into(), &ContentPointer::inline(&b"abc"[..]))
            .unwrap());
    }

    // -----------------------------------------------------------------------
    // Prefix lookup
    // -----------------------------------------------------------------------

    #[test]
    fn prefix_lookup_none_one_many() {
        let store = small_store();
        let mut by_first_byte: std::collections::HashMap<u8, Vec<ContentId>> = Default::default();
        let mut n = 0u32;
        // Store until some first byte is shared by two ids.
        let (shared, pair) = loop {
            let p = store.store_bytes(format!("item {n}").as_bytes()).unwrap();
            n += 1;
            let ids = by_first_byte.entry(p.sha.as_bytes()[0]).or_default();
            ids.push(p.sha);
            if ids.len() == 2 {
                break (p.sha.as_bytes()[0], ids.clone());
            }
        };

        let err = store.find_by_prefix(&[shared]).unwrap_err();
        assert!(matches!(err, ContentError::AmbiguousPrefix { ref matches, .. } if matches.len() == 2));

        let unique = store.find_by_prefix(&pair[0].as_bytes()[..4]).unwrap().unwrap();
        assert_eq!(unique.record_id(), Some(pair[0]));

        let hex = &pair[1].to_hex()[..9];
        let found = store.find_by_hex_prefix(hex).unwrap().unwrap();
        assert_eq!(found.record_id(), Some(pair[1]));

        let unused = (0..=255u8).find(|b| !by_first_byte.contains_key(b)).unwrap();
        assert!(store.find_by_prefix(&[unused]).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Alternatives
    // -----------------------------------------------------------------------

    #[test]
    fn register_alt_creates_record_with_primary() {
        let store = small_store();
        let a = store.store_bytes(&noise(9, 300)).unwrap();
        let b = store.store_bytes(&noise(10, 300)).unwrap();
        let mut joined = read(&store, a);
        joined.extend(read(&store, b));
        let id = ContentId::digest(&joined);

        let scheme = Scheme::Concatenation(vec![
            Piece::Base { id: a.sha, offset: 0, length: 300 },
            Piece::Base { id: b.sha, offset: 0, length: 300 },
        ]);
        store.register_alt(id, 600, scheme.clone(), Some("doc-1")).unwrap();

        let record = store.record(&id).unwrap().unwrap();
        assert_eq!(record.scheme, scheme);
        assert!(record.owners.contains("doc-1"));
        assert!(store.record(&a.sha).unwrap().unwrap().ref_base.contains(&id));
        assert_eq!(store.read_all(&ContentPointer::stored(id, 600)).unwrap(), joined);
    }

    #[test]
    fn register_alt_appends_to_existing_record() {
        let store = small_store();
        let data = noise(11, 800);
        let whole = store.store_bytes(&data).unwrap();
        let left = store.store_bytes(&data[..400]).unwrap();
        let right = store.store_bytes(&data[400..]).unwrap();
        let scheme = Scheme::Concatenation(vec![
            Piece::Base { id: left.sha, offset: 0, length: 400 },
            Piece::Base { id: right.sha, offset: 0, length: 400 },
        ]);
        store.register_alt(whole.sha, 800, scheme.clone(), None).unwrap();
        store.register_alt(whole.sha, 800, scheme.clone(), None).unwrap();

        let record = store.record(&whole.sha).unwrap().unwrap();
        assert_eq!(record.scheme, Scheme::Raw);
        assert_eq!(record.alt, vec![scheme]);
    }

    #[test]
    fn register_alt_rejects_missing_bases_and_bad_lengths() {
        let store = small_store();
        let ghost = ContentId::digest(b"ghost");
        let id = ContentId::digest(b"whatever");
        let err = store
            .register_alt(
                id,
                10,
                Scheme::Concatenation(vec![Piece::Base { id: ghost, offset: 0, length: 10 }]),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ContentError::ReferentialIntegrity(_)));
        assert!(store.record(&id).unwrap().is_none());

        let err = store
            .register_alt(id, 11, Scheme::Concatenation(vec![Piece::literal(&b"ten bytes!"[..])]), None)
            .unwrap_err();
        assert!(matches!(err, ContentError::LengthMismatch { expected: 11, actual: 10, .. }));

        let stored = store.store_bytes(b"four").unwrap();
        let err = store.register_alt(stored.sha, 5, Scheme::Raw, None).unwrap_err();
        assert!(matches!(err, ContentError::LengthMismatch { expected: 4, actual: 5, .. }));
    }

    #[test]
    fn read_falls_back_to_alternative() {
        let store = small_store();
        let data = noise(12, 800);
        let whole = store.store_bytes(&data).unwrap();
        let left = store.store_bytes(&data[..500]).unwrap();
        let right = store.store_bytes(&data[500..]).unwrap();
        store
            .register_alt(
                whole.sha,
                800,
                Scheme::Concatenation(vec![
                    Piece::Base { id: left.sha, offset: 0, length: 500 },
                    Piece::Base { id: right.sha, offset: 0, length: 300 },
                ]),
                None,
            )
            .unwrap();
        store.blobs().delete(&raw_blob_key(&whole.sha)).unwrap();
        assert_eq!(read(&store, whole), data);
    }

    fn truncate_blob(store: &ContentStore, key: &str) {
        let mut payload = Vec::new();
        store.blobs().open(key, 0).unwrap().read_to_end(&mut payload).unwrap();
        payload.truncate(payload.len() / 2);
        store.blobs().put(key, &mut payload.as_slice()).unwrap();
    }

    #[test]
    fn corrupted_primary_falls_back_mid_stream() {
        let store = small_store();
        let data = b"the gzip payload will be cut in half. ".repeat(58);
        let whole = store.store_bytes(&data).unwrap();
        assert_eq!(primary(&store, &whole.sha), Scheme::Gzip);
        let half = data.len() / 2;
        let left = store.store_bytes(&data[..half]).unwrap();
        let right = store.store_bytes(&data[half..]).unwrap();
        store
            .register_alt(
                whole.sha,
                data.len() as u64,
                Scheme::Concatenation(vec![
                    Piece::Base { id: left.sha, offset: 0, length: left.length },
                    Piece::Base { id: right.sha, offset: 0, length: right.length },
                ]),
                None,
            )
            .unwrap();
        truncate_blob(&store, &gzip_blob_key(&whole.sha));

        assert_eq!(read(&store, whole), data);
        let content = store.open(&whole.into()).unwrap();
        assert_eq!(content.read_range(1500, 400).unwrap(), &data[1500..1900]);
    }

    #[test]
    fn corrupted_primary_without_alternative_fails() {
        let store = small_store();
        let data = b"nothing to fall back on. ".repeat(80);
        let whole = store.store_bytes(&data).unwrap();
        truncate_blob(&store, &gzip_blob_key(&whole.sha));
        assert!(store.read_all(&whole.into()).is_err());
    }

    #[test]
    fn owners_can_be_released() {
        let store = small_store();
        let p = store.store_bytes(b"owned").unwrap();
        store.register_alt(p.sha, 5, Scheme::InlineRaw(Bytes::from_static(b"owned")), Some("o"))
            .unwrap();
        assert!(store.release_owner(&p.sha, "o").unwrap());
        let record = store.record(&p.sha).unwrap().unwrap();
        assert!(record.owners.is_empty());
        assert!(record.owner_history.contains("o"));
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    #[test]
    fn remove_content_deletes_record_and_blob() {
        let store = small_store();
        let p = store.store_bytes(&noise(13, 600)).unwrap();
        assert!(store.remove_content(&p.sha).unwrap());
        assert!(store.record(&p.sha).unwrap().is_none());
        assert!(!store.blobs().exists(&raw_blob_key(&p.sha)).unwrap());
        assert!(!store.remove_content(&p.sha).unwrap());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn roundtrip_any_bytes(
            data in prop_oneof![
                proptest::collection::vec(any::<u8>(), 0..3000),
                (any::<u8>(), 0usize..3000).prop_map(|(b, n)| vec![b; n]),
            ],
        ) {
            let store = small_store();
            let p = store.store_bytes(&data).unwrap();
            prop_assert_eq!(p.sha, ContentId::digest(&data));
            prop_assert_eq!(p.length, data.len() as u64);
            prop_assert_eq!(read(&store, p), data);
        }
    }
}
