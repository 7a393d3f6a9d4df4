//! Read path: decoding each storage scheme into a byte stream.
//!
//! Every scheme resolves to a `Read` over an `(offset, length)` window of
//! the record. Concatenations and zip entries resolve their pieces lazily,
//! opening each sub-stream only when the previous one is exhausted.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use cask_codec::{gzip_reader, inflate, CodecError, ExactReader, LocalHeader, ZipEntryReader};
use cask_store::{gzip_blob_key, raw_blob_key, BlobStore, ContentRecord, Piece, RecordStore, Scheme};
use cask_types::{ContentId, InlinePointer};
use tracing::{debug, warn};

use crate::concat::slice_pieces;
use crate::error::{ContentError, ContentResult};

/// Boxed byte stream handed to callers.
pub type ByteStream = Box<dyn Read + Send>;

/// Nesting limit for composites that reference composites.
pub(crate) const MAX_DEPTH: usize = 32;

/// Shared handles to the storage backends.
#[derive(Clone)]
pub(crate) struct Backends {
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) external: Option<Arc<dyn BlobStore>>,
}

impl Backends {
    pub(crate) fn require(&self, id: &ContentId) -> ContentResult<ContentRecord> {
        self.records.get(id)?.ok_or(ContentError::NotFound(*id))
    }

    /// Open `length` bytes of record `id` starting at `offset`.
    ///
    /// Tries the primary scheme first, then each alternative in order. A
    /// representation that fails partway through a read is replaced by the
    /// next one, resumed at the same position.
    pub(crate) fn open_record(
        &self,
        id: &ContentId,
        offset: u64,
        length: u64,
        depth: usize,
    ) -> ContentResult<ByteStream> {
        if depth > MAX_DEPTH {
            return Err(ContentError::ReferentialIntegrity(format!(
                "content {id} nests deeper than {MAX_DEPTH} levels"
            )));
        }
        let record = self.require(id)?;
        check_range(&record, offset, length)?;

        let (index, stream) = self.open_first(&record, 0, offset, length, depth)?;
        if index + 1 >= record.schemes().count() {
            return Ok(stream);
        }
        Ok(Box::new(FallbackReader {
            backends: self.clone(),
            record,
            next: index + 1,
            offset,
            length,
            position: 0,
            depth,
            current: stream,
        }))
    }

    /// Open the first representation at or after `start` that opens.
    /// Returns its index among the record's schemes.
    fn open_first(
        &self,
        record: &ContentRecord,
        start: usize,
        offset: u64,
        length: u64,
        depth: usize,
    ) -> ContentResult<(usize, ByteStream)> {
        let mut last_err = None;
        for (index, scheme) in record.schemes().enumerate().skip(start) {
            match self.open_scheme(record, scheme, offset, length, depth) {
                Ok(stream) => {
                    if index > 0 {
                        debug!(id = %record.id, scheme = scheme.label(), "read from alternative representation");
                    }
                    return Ok((index, stream));
                }
                Err(e) => {
                    warn!(id = %record.id, scheme = scheme.label(), error = %e, "representation unavailable");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(ContentError::NotFound(record.id)))
    }

    /// Open a window of one representation of `record`.
    pub(crate) fn open_scheme(
        &self,
        record: &ContentRecord,
        scheme: &Scheme,
        offset: u64,
        length: u64,
        depth: usize,
    ) -> ContentResult<ByteStream> {
        let whole = offset == 0 && length == record.length;
        match scheme {
            Scheme::Raw => {
                let stream = self.blobs.open(&raw_blob_key(&record.id), offset)?;
                Ok(exact(stream, length, whole))
            }
            Scheme::InlineRaw(bytes) => {
                if bytes.len() as u64 != record.length {
                    return Err(CodecError::SizeMismatch {
                        expected: record.length,
                        actual: bytes.len() as u64,
                    }
                    .into());
                }
                let start = offset as usize;
                let end = start + length as usize;
                Ok(Box::new(Cursor::new(bytes.slice(start..end))))
            }
            Scheme::InlineDeflated(compressed) => {
                let data = inflate(compressed, record.length)?;
                let start = offset as usize;
                let end = start + length as usize;
                Ok(Box::new(Cursor::new(data[start..end].to_vec())))
            }
            Scheme::Gzip => {
                let blob = self.blobs.open(&gzip_blob_key(&record.id), 0)?;
                let stream: ByteStream = Box::new(gzip_reader(blob, record.length));
                window(stream, offset, length, record.length)
            }
            Scheme::Concatenation(pieces) => {
                let total: u64 = pieces.iter().map(Piece::len).sum();
                if total != record.length {
                    return Err(CodecError::SizeMismatch {
                        expected: record.length,
                        actual: total,
                    }
                    .into());
                }
                let pieces = slice_pieces(pieces, offset, length);
                Ok(Box::new(ChainReader::new(self.clone(), pieces, depth + 1)))
            }
            Scheme::ZipEntry {
                archive,
                offset: header_offset,
                end,
                length: member_length,
            } => {
                if *member_length != record.length {
                    return Err(ContentError::LengthMismatch {
                        id: record.id,
                        expected: record.length,
                        actual: *member_length,
                    });
                }
                let (_, entry) = self.open_zip_entry(archive, *header_offset, *end, depth + 1)?;
                window(Box::new(entry), offset, length, record.length)
            }
            Scheme::External { key } => {
                let external = self.external.as_ref().ok_or(ContentError::NoExternalStore)?;
                let stream = external.open(key, offset)?;
                Ok(exact(stream, length, whole))
            }
        }
    }

    /// Parse the local header at `header_offset` in `archive` and return a
    /// reader over the decoded member, whose compressed data ends at `end`.
    pub(crate) fn open_zip_entry(
        &self,
        archive: &ContentId,
        header_offset: u64,
        end: u64,
        depth: usize,
    ) -> ContentResult<(LocalHeader, ZipEntryReader<'static>)> {
        let span = end.checked_sub(header_offset).ok_or_else(|| {
            ContentError::from(CodecError::InvalidZipHeader {
                offset: header_offset,
                reason: format!("member ends at {end}, before its header"),
            })
        })?;
        let mut raw = self.open_record(archive, header_offset, span, depth)?;
        let header = LocalHeader::read_from(&mut raw, header_offset)?;
        let compressed = span.checked_sub(header.header_len).ok_or_else(|| {
            ContentError::from(CodecError::InvalidZipHeader {
                offset: header_offset,
                reason: format!(
                    "header of {} bytes does not fit in a {span} byte member",
                    header.header_len
                ),
            })
        })?;
        let entry = ZipEntryReader::new(raw, &header, compressed)?;
        Ok((header, entry))
    }

    /// Open the bytes one piece contributes.
    pub(crate) fn open_piece(&self, piece: &Piece, depth: usize) -> ContentResult<ByteStream> {
        match piece {
            Piece::Literal(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Piece::Base { id, offset, length } => self.open_record(id, *offset, *length, depth),
            Piece::Zip {
                id,
                offset,
                end,
                skip,
                length,
            } => {
                let (header, entry) = self.open_zip_entry(id, *offset, *end, depth)?;
                let total = header.declared_size().unwrap_or(u64::MAX);
                window(Box::new(entry), *skip, *length, total)
            }
        }
    }

    /// Read one piece fully into memory.
    pub(crate) fn materialize(&self, piece: &Piece, depth: usize) -> ContentResult<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(piece.len()).unwrap_or(0));
        self.open_piece(piece, depth)?
            .read_to_end(&mut out)
            .map_err(ContentError::from_io)?;
        Ok(out)
    }
}

fn check_range(record: &ContentRecord, offset: u64, length: u64) -> ContentResult<()> {
    match offset.checked_add(length) {
        Some(end) if end <= record.length => Ok(()),
        _ => Err(ContentError::InvalidRange {
            id: record.id,
            offset,
            length,
            available: record.length,
        }),
    }
}

/// Enforce that `stream` yields exactly `length` bytes. When the window is
/// the whole content, trailing data is an error too.
fn exact(stream: ByteStream, length: u64, whole: bool) -> ByteStream {
    if whole {
        Box::new(ExactReader::new(stream, length))
    } else {
        Box::new(ExactReader::new(stream.take(length), length))
    }
}

/// Skip `offset` bytes of a decoded stream of `total` bytes, then expose
/// exactly `length` bytes.
fn window(mut stream: ByteStream, offset: u64, length: u64, total: u64) -> ContentResult<ByteStream> {
    if offset > 0 {
        let skipped = io::copy(&mut (&mut stream).take(offset), &mut io::sink())
            .map_err(ContentError::from_io)?;
        if skipped != offset {
            return Err(CodecError::SizeMismatch {
                expected: offset,
                actual: skipped,
            }
            .into());
        }
    }
    Ok(exact(stream, length, offset == 0 && length == total))
}

// ---------------------------------------------------------------------------
// FallbackReader
// ---------------------------------------------------------------------------

/// Window of a record that switches to the next representation when the
/// current one fails mid-stream.
struct FallbackReader {
    backends: Backends,
    record: ContentRecord,
    /// Index of the next scheme to try.
    next: usize,
    offset: u64,
    length: u64,
    /// Bytes already handed out.
    position: u64,
    depth: usize,
    current: ByteStream,
}

impl Read for FallbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let err = match self.current.read(buf) {
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
                Err(e) => e,
            };
            if self.next >= self.record.schemes().count() {
                return Err(err);
            }
            warn!(
                id = %self.record.id,
                position = self.position,
                error = %err,
                "representation failed mid-stream"
            );
            let resumed = self.backends.open_first(
                &self.record,
                self.next,
                self.offset + self.position,
                self.length - self.position,
                self.depth,
            );
            match resumed {
                Ok((index, stream)) => {
                    self.next = index + 1;
                    self.current = stream;
                }
                Err(_) => {
                    self.next = usize::MAX;
                    return Err(err);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChainReader
// ---------------------------------------------------------------------------

/// Sequential join of pieces, each opened when reached and dropped once
/// exhausted.
pub(crate) struct ChainReader {
    backends: Backends,
    pending: VecDeque<Piece>,
    current: Option<ByteStream>,
    depth: usize,
}

impl ChainReader {
    pub(crate) fn new(backends: Backends, pieces: Vec<Piece>, depth: usize) -> Self {
        Self {
            backends,
            pending: pieces.into(),
            current: None,
            depth,
        }
    }
}

impl Read for ChainReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.current.is_none() {
                let Some(piece) = self.pending.pop_front() else {
                    return Ok(0);
                };
                let stream = self
                    .backends
                    .open_piece(&piece, self.depth)
                    .map_err(ContentError::into_io)?;
                self.current = Some(stream);
            }
            if let Some(stream) = self.current.as_mut() {
                let n = stream.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
            }
            self.current = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

enum Source {
    Inline(InlinePointer),
    Stored(ContentId),
}

/// Resolved content: a length and random-access reads.
pub struct Content {
    backends: Backends,
    source: Source,
    length: u64,
}

impl Content {
    pub(crate) fn inline(backends: Backends, pointer: InlinePointer) -> Self {
        let length = pointer.len();
        Self {
            backends,
            source: Source::Inline(pointer),
            length,
        }
    }

    pub(crate) fn stored(backends: Backends, id: ContentId, length: u64) -> Self {
        Self {
            backends,
            source: Source::Stored(id),
            length,
        }
    }

    /// Logical length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The backing record, for stored content.
    pub fn record_id(&self) -> Option<ContentId> {
        match self.source {
            Source::Stored(id) => Some(id),
            Source::Inline(_) => None,
        }
    }

    /// Stream `length` bytes starting at `offset`, clamped to the content.
    pub fn read(&self, offset: u64, length: u64) -> ContentResult<ByteStream> {
        let start = offset.min(self.length);
        let length = length.min(self.length - start);
        match &self.source {
            Source::Inline(pointer) => Ok(Box::new(pointer.reader(start, length))),
            Source::Stored(id) => self.backends.open_record(id, start, length, 0),
        }
    }

    /// Stream the whole content.
    pub fn open(&self) -> ContentResult<ByteStream> {
        self.read(0, self.length)
    }

    /// Read a range fully into memory.
    pub fn read_range(&self, offset: u64, length: u64) -> ContentResult<Vec<u8>> {
        let mut out = Vec::new();
        self.read(offset, length)?
            .read_to_end(&mut out)
            .map_err(ContentError::from_io)?;
        Ok(out)
    }

    /// Read the whole content into memory.
    pub fn read_all(&self) -> ContentResult<Vec<u8>> {
        self.read_range(0, self.length)
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Content")
            .field("record", &self.record_id())
            .field("length", &self.length)
            .finish()
    }
}
