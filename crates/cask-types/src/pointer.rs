//! Content pointers: how owner documents refer to content.
//!
//! A pointer is either small enough to carry its bytes inline, or a
//! reference to a persisted content record by digest. Pointers serialize as
//! `{"in": [..]}` or `{"sha": "..", "length": n}` so they can be embedded
//! directly in owner metadata documents.

use std::io::{self, Read};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::ContentId;

/// Reference to content, either inline or stored by digest.
///
/// Structural equality (`==`) compares representations, not content: an
/// inline pointer and a stored pointer to the same bytes are not `==`.
/// Content equality must be decided by comparing digests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPointer {
    /// Reference to a persisted content record.
    Stored(StoredPointer),
    /// Bytes carried inside the pointer itself.
    Inline(InlinePointer),
}

impl ContentPointer {
    /// Inline pointer over the given bytes.
    pub fn inline(bytes: impl Into<Bytes>) -> Self {
        Self::Inline(InlinePointer::new(bytes))
    }

    /// Stored pointer to the first `length` bytes of record `sha`.
    pub fn stored(sha: ContentId, length: u64) -> Self {
        Self::Stored(StoredPointer { sha, length })
    }

    /// Logical length of the content in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::Stored(p) => p.length,
            Self::Inline(p) => p.len(),
        }
    }

    /// Returns `true` if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The referenced record id, for stored pointers.
    pub fn stored_id(&self) -> Option<ContentId> {
        match self {
            Self::Stored(p) => Some(p.sha),
            Self::Inline(_) => None,
        }
    }

    /// Returns `true` for inline pointers.
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

impl From<StoredPointer> for ContentPointer {
    fn from(p: StoredPointer) -> Self {
        Self::Stored(p)
    }
}

impl From<InlinePointer> for ContentPointer {
    fn from(p: InlinePointer) -> Self {
        Self::Inline(p)
    }
}

// ---------------------------------------------------------------------------
// StoredPointer
// ---------------------------------------------------------------------------

/// Reference to a persisted content record.
///
/// `length` may be shorter than the record, in which case the pointer denotes
/// only the first `length` bytes (a sub-length view).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredPointer {
    pub sha: ContentId,
    pub length: u64,
}

impl StoredPointer {
    pub fn new(sha: ContentId, length: u64) -> Self {
        Self { sha, length }
    }
}

// ---------------------------------------------------------------------------
// InlinePointer
// ---------------------------------------------------------------------------

/// Content small enough to carry inside the pointer.
///
/// `virtual_length` may exceed the number of carried bytes. The content is
/// then the carried bytes repeated cyclically, starting at `repeat_offset`:
/// byte `i` of the content is `bytes[(repeat_offset + i) % bytes.len()]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InlineDoc", into = "InlineDoc")]
pub struct InlinePointer {
    bytes: Bytes,
    virtual_length: u64,
    repeat_offset: u64,
}

impl InlinePointer {
    /// Pointer whose content is exactly `bytes`.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let virtual_length = bytes.len() as u64;
        Self {
            bytes,
            virtual_length,
            repeat_offset: 0,
        }
    }

    /// Pointer whose content repeats `bytes` up to `virtual_length`, starting
    /// at `repeat_offset` within `bytes`.
    pub fn repeating(
        bytes: impl Into<Bytes>,
        virtual_length: u64,
        repeat_offset: u64,
    ) -> Result<Self, TypeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            if virtual_length > 0 {
                return Err(TypeError::InvalidPointer(
                    "cannot repeat empty inline content".into(),
                ));
            }
            return Ok(Self::new(bytes));
        }
        let repeat_offset = repeat_offset % bytes.len() as u64;
        Ok(Self {
            bytes,
            virtual_length,
            repeat_offset,
        })
    }

    /// The carried bytes (not the logical content).
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Logical length of the content.
    pub fn len(&self) -> u64 {
        self.virtual_length
    }

    pub fn is_empty(&self) -> bool {
        self.virtual_length == 0
    }

    /// Offset into the carried bytes where the logical content starts.
    pub fn repeat_offset(&self) -> u64 {
        self.repeat_offset
    }

    /// Returns `true` if the content is exactly the carried bytes.
    pub fn is_plain(&self) -> bool {
        self.repeat_offset == 0 && self.virtual_length == self.bytes.len() as u64
    }

    /// Stream `length` bytes of the logical content starting at `offset`.
    ///
    /// The range is clamped to the logical length.
    pub fn reader(&self, offset: u64, length: u64) -> RepeatingReader {
        let start = offset.min(self.virtual_length);
        let remaining = length.min(self.virtual_length - start);
        let position = if self.bytes.is_empty() {
            0
        } else {
            ((self.repeat_offset + start) % self.bytes.len() as u64) as usize
        };
        RepeatingReader {
            bytes: self.bytes.clone(),
            position,
            remaining,
        }
    }

    /// Materialize `length` bytes of the logical content starting at `offset`.
    pub fn read_range(&self, offset: u64, length: u64) -> Bytes {
        if self.is_plain() {
            let start = offset.min(self.virtual_length) as usize;
            let end = (start as u64).saturating_add(length).min(self.virtual_length) as usize;
            return self.bytes.slice(start..end);
        }
        let mut out = Vec::new();
        // Reading from an in-memory cycle cannot fail.
        let _ = self.reader(offset, length).read_to_end(&mut out);
        Bytes::from(out)
    }

    /// Materialize the full logical content.
    pub fn to_bytes(&self) -> Bytes {
        self.read_range(0, self.virtual_length)
    }
}

/// Streaming reader over an inline pointer's cyclic content.
#[derive(Clone, Debug)]
pub struct RepeatingReader {
    bytes: Bytes,
    position: usize,
    remaining: u64,
}

impl Read for RepeatingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let available = self.bytes.len() - self.position;
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let n = buf.len().min(available).min(remaining);
        buf[..n].copy_from_slice(&self.bytes[self.position..self.position + n]);
        self.position += n;
        if self.position == self.bytes.len() {
            self.position = 0;
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Wire shape of an inline pointer: `{"in": [..], "len"?: n, "off"?: n}`.
#[derive(Serialize, Deserialize)]
struct InlineDoc {
    #[serde(rename = "in")]
    bytes: Vec<u8>,
    #[serde(rename = "len", default, skip_serializing_if = "Option::is_none")]
    virtual_length: Option<u64>,
    #[serde(rename = "off", default, skip_serializing_if = "Option::is_none")]
    repeat_offset: Option<u64>,
}

impl TryFrom<InlineDoc> for InlinePointer {
    type Error = TypeError;

    fn try_from(doc: InlineDoc) -> Result<Self, Self::Error> {
        let length = doc.virtual_length.unwrap_or(doc.bytes.len() as u64);
        Self::repeating(doc.bytes, length, doc.repeat_offset.unwrap_or(0))
    }
}

impl From<InlinePointer> for InlineDoc {
    fn from(p: InlinePointer) -> Self {
        let plain = p.is_plain();
        Self {
            bytes: p.bytes.to_vec(),
            virtual_length: (!plain).then_some(p.virtual_length),
            repeat_offset: (p.repeat_offset != 0).then_some(p.repeat_offset),
        }
    }
}
