//! Persisted content records and their wire shapes.
//!
//! A [`ContentRecord`] is keyed by the SHA-1 of the exact bytes it
//! represents. How those bytes are laid out is described by a [`Scheme`]:
//! the primary one plus any number of alternatives appended later.
//!
//! Records serialize to the document shape shared with other collaborators:
//!
//! ```text
//! { _id, store: "raw"|"gz"|"cat"|"zip"|"ext"|"alt",
//!   in?, zin?, length?, base?: [Piece], alt?: [Scheme], key?,
//!   refs?, refHistory?, refBase?, filename?, contentType? }
//! ```
//!
//! Typed values convert to and from these documents, so an unknown `store`
//! tag or a malformed piece surfaces as a [`StoreError`] at decode time.

use std::collections::BTreeSet;

use bytes::Bytes;
use cask_types::ContentId;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const TAG_RAW: &str = "raw";
pub const TAG_GZIP: &str = "gz";
pub const TAG_CONCAT: &str = "cat";
pub const TAG_ZIP: &str = "zip";
pub const TAG_EXTERNAL: &str = "ext";
pub const TAG_ALT: &str = "alt";

/// Blob key holding the uncompressed payload of a `raw` record.
pub fn raw_blob_key(id: &ContentId) -> String {
    id.to_hex()
}

/// Blob key holding the gzip payload of a `gz` record.
pub fn gzip_blob_key(id: &ContentId) -> String {
    format!("{}.gz", id.to_hex())
}

// ---------------------------------------------------------------------------
// Piece
// ---------------------------------------------------------------------------

/// One segment of a concatenation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PieceDoc", into = "PieceDoc")]
pub enum Piece {
    /// Bytes carried in the piece itself.
    Literal(Bytes),
    /// `length` bytes of record `id` starting at `offset`.
    Base {
        id: ContentId,
        offset: u64,
        length: u64,
    },
    /// A zip member whose local header starts at `offset` in archive `id`
    /// and whose compressed data ends at `end`. The piece denotes `length`
    /// decoded bytes starting `skip` bytes into the member.
    Zip {
        id: ContentId,
        offset: u64,
        end: u64,
        skip: u64,
        length: u64,
    },
}

impl Piece {
    pub fn literal(bytes: impl Into<Bytes>) -> Self {
        Self::Literal(bytes.into())
    }

    /// Number of content bytes this piece contributes.
    pub fn len(&self) -> u64 {
        match self {
            Self::Literal(bytes) => bytes.len() as u64,
            Self::Base { length, .. } | Self::Zip { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The referenced record, for non-literal pieces.
    pub fn base_id(&self) -> Option<ContentId> {
        match self {
            Self::Literal(_) => None,
            Self::Base { id, .. } | Self::Zip { id, .. } => Some(*id),
        }
    }

    /// Whether the encoded reference carries an `off` field.
    pub fn has_offset(&self) -> bool {
        match self {
            Self::Literal(_) => false,
            Self::Base { offset, .. } => *offset > 0,
            Self::Zip { .. } => true,
        }
    }

    /// Keep only the first `n` bytes.
    pub fn trim_to_length(self, n: u64) -> Self {
        match self {
            Self::Literal(bytes) => {
                let keep = usize::try_from(n).unwrap_or(usize::MAX).min(bytes.len());
                Self::Literal(bytes.slice(..keep))
            }
            Self::Base { id, offset, length } => Self::Base {
                id,
                offset,
                length: length.min(n),
            },
            Self::Zip {
                id,
                offset,
                end,
                skip,
                length,
            } => Self::Zip {
                id,
                offset,
                end,
                skip,
                length: length.min(n),
            },
        }
    }

    /// Drop the first `n` bytes.
    pub fn add_offset(self, n: u64) -> Self {
        let n = n.min(self.len());
        match self {
            Self::Literal(bytes) => Self::Literal(bytes.slice(n as usize..)),
            Self::Base { id, offset, length } => Self::Base {
                id,
                offset: offset + n,
                length: length - n,
            },
            Self::Zip {
                id,
                offset,
                end,
                skip,
                length,
            } => Self::Zip {
                id,
                offset,
                end,
                skip: skip + n,
                length: length - n,
            },
        }
    }
}

/// Wire shape of a piece: raw bytes, or
/// `{_id, len, off?, store?: "zip", end?, skip?}`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PieceDoc {
    Literal(Vec<u8>),
    Reference(ReferenceDoc),
}

#[derive(Serialize, Deserialize)]
struct ReferenceDoc {
    #[serde(rename = "_id")]
    id: ContentId,
    len: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    off: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<u64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    skip: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl TryFrom<PieceDoc> for Piece {
    type Error = StoreError;

    fn try_from(doc: PieceDoc) -> Result<Self, Self::Error> {
        let r = match doc {
            PieceDoc::Literal(bytes) => return Ok(Self::Literal(Bytes::from(bytes))),
            PieceDoc::Reference(r) => r,
        };
        match r.store.as_deref() {
            None => Ok(Self::Base {
                id: r.id,
                offset: r.off.unwrap_or(0),
                length: r.len,
            }),
            Some(TAG_ZIP) => {
                let end = r.end.ok_or_else(|| {
                    StoreError::ReferentialIntegrity(format!(
                        "zip piece of {} is missing its end offset",
                        r.id
                    ))
                })?;
                let offset = r.off.unwrap_or(0);
                if end < offset {
                    return Err(StoreError::ReferentialIntegrity(format!(
                        "zip piece of {} ends at {end} before its header at {offset}",
                        r.id
                    )));
                }
                Ok(Self::Zip {
                    id: r.id,
                    offset,
                    end,
                    skip: r.skip,
                    length: r.len,
                })
            }
            Some(other) => Err(StoreError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl From<Piece> for PieceDoc {
    fn from(piece: Piece) -> Self {
        match piece {
            Piece::Literal(bytes) => PieceDoc::Literal(bytes.to_vec()),
            Piece::Base { id, offset, length } => PieceDoc::Reference(ReferenceDoc {
                id,
                len: length,
                off: (offset > 0).then_some(offset),
                store: None,
                end: None,
                skip: 0,
            }),
            Piece::Zip {
                id,
                offset,
                end,
                skip,
                length,
            } => PieceDoc::Reference(ReferenceDoc {
                id,
                len: length,
                off: Some(offset),
                store: Some(TAG_ZIP.to_string()),
                end: Some(end),
                skip,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheme
// ---------------------------------------------------------------------------

/// How a record's bytes are represented.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemeDoc", into = "SchemeDoc")]
pub enum Scheme {
    /// Uncompressed payload in the blob store under [`raw_blob_key`].
    Raw,
    /// Uncompressed bytes inside the record.
    InlineRaw(Bytes),
    /// Raw DEFLATE bytes inside the record.
    InlineDeflated(Bytes),
    /// Gzip payload in the blob store under [`gzip_blob_key`].
    Gzip,
    /// Sequential join of pieces.
    Concatenation(Vec<Piece>),
    /// One member of a stored zip archive, decoded in place.
    ZipEntry {
        archive: ContentId,
        offset: u64,
        end: u64,
        length: u64,
    },
    /// Payload held in an external blob store under `key`.
    External { key: String },
}

impl Scheme {
    /// The wire `store` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Raw | Self::InlineRaw(_) | Self::InlineDeflated(_) => TAG_RAW,
            Self::Gzip => TAG_GZIP,
            Self::Concatenation(_) => TAG_CONCAT,
            Self::ZipEntry { .. } => TAG_ZIP,
            Self::External { .. } => TAG_EXTERNAL,
        }
    }

    /// Short name distinguishing the inline variants, for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InlineRaw(_) => "in",
            Self::InlineDeflated(_) => "zin",
            other => other.tag(),
        }
    }

    /// Whether this scheme is built from other records.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Concatenation(_) | Self::ZipEntry { .. })
    }

    /// Records this scheme reads from, in first-use order without repeats.
    pub fn base_ids(&self) -> Vec<ContentId> {
        let mut ids: Vec<ContentId> = Vec::new();
        match self {
            Self::Concatenation(pieces) => {
                for id in pieces.iter().filter_map(Piece::base_id) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            Self::ZipEntry { archive, .. } => ids.push(*archive),
            _ => {}
        }
        ids
    }

    /// Key of the payload this scheme keeps in the local blob store.
    pub fn local_blob_key(&self, id: &ContentId) -> Option<String> {
        match self {
            Self::Raw => Some(raw_blob_key(id)),
            Self::Gzip => Some(gzip_blob_key(id)),
            _ => None,
        }
    }

    /// Key of the payload this scheme keeps in the external blob store.
    pub fn external_key(&self) -> Option<&str> {
        match self {
            Self::External { key } => Some(key),
            _ => None,
        }
    }
}

/// Wire shape of a scheme; flattened into records and listed under `alt`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SchemeDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    store: Option<String>,
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    inline: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zin: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base: Option<Vec<Piece>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

impl TryFrom<SchemeDoc> for Scheme {
    type Error = StoreError;

    fn try_from(doc: SchemeDoc) -> Result<Self, Self::Error> {
        let Some(tag) = doc.store else {
            return Err(StoreError::ReferentialIntegrity(
                "storage scheme is missing its store tag".into(),
            ));
        };
        match tag.as_str() {
            TAG_RAW => Ok(match (doc.inline, doc.zin) {
                (Some(bytes), _) => Self::InlineRaw(Bytes::from(bytes)),
                (None, Some(bytes)) => Self::InlineDeflated(Bytes::from(bytes)),
                (None, None) => Self::Raw,
            }),
            TAG_GZIP => Ok(Self::Gzip),
            TAG_CONCAT => {
                let pieces = doc.base.ok_or_else(|| {
                    StoreError::ReferentialIntegrity("concatenation has no base list".into())
                })?;
                Ok(Self::Concatenation(pieces))
            }
            TAG_ZIP => match doc.base.as_deref() {
                Some(
                    [Piece::Zip {
                        id,
                        offset,
                        end,
                        skip: 0,
                        length,
                    }],
                ) => Ok(Self::ZipEntry {
                    archive: *id,
                    offset: *offset,
                    end: *end,
                    length: *length,
                }),
                _ => Err(StoreError::ReferentialIntegrity(
                    "zip entry must name exactly one whole zip piece".into(),
                )),
            },
            TAG_EXTERNAL => {
                let key = doc.key.ok_or_else(|| {
                    StoreError::ReferentialIntegrity("external blob reference has no key".into())
                })?;
                Ok(Self::External { key })
            }
            _ => Err(StoreError::UnsupportedScheme(tag)),
        }
    }
}

impl From<Scheme> for SchemeDoc {
    fn from(scheme: Scheme) -> Self {
        let mut doc = SchemeDoc {
            store: Some(scheme.tag().to_string()),
            ..SchemeDoc::default()
        };
        match scheme {
            Scheme::Raw | Scheme::Gzip => {}
            Scheme::InlineRaw(bytes) => doc.inline = Some(bytes.to_vec()),
            Scheme::InlineDeflated(bytes) => doc.zin = Some(bytes.to_vec()),
            Scheme::Concatenation(pieces) => doc.base = Some(pieces),
            Scheme::ZipEntry {
                archive,
                offset,
                end,
                length,
            } => {
                doc.base = Some(vec![Piece::Zip {
                    id: archive,
                    offset,
                    end,
                    skip: 0,
                    length,
                }])
            }
            Scheme::External { key } => doc.key = Some(key),
        }
        doc
    }
}

// ---------------------------------------------------------------------------
// ContentRecord
// ---------------------------------------------------------------------------

/// Persisted, digest-keyed unit of stored content.
///
/// Immutable once written except for appending alternatives, owners and
/// `ref_base` entries, and for swapping the primary scheme during
/// migration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordDoc", into = "RecordDoc")]
pub struct ContentRecord {
    pub id: ContentId,
    pub length: u64,
    pub scheme: Scheme,
    pub alt: Vec<Scheme>,
    /// Owners that registered this content directly.
    pub owners: BTreeSet<String>,
    /// Every owner ever registered.
    pub owner_history: BTreeSet<String>,
    /// Composite records that use this one as a piece.
    pub ref_base: BTreeSet<ContentId>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl ContentRecord {
    pub fn new(id: ContentId, length: u64, scheme: Scheme) -> Self {
        Self {
            id,
            length,
            scheme,
            alt: Vec::new(),
            owners: BTreeSet::new(),
            owner_history: BTreeSet::new(),
            ref_base: BTreeSet::new(),
            filename: None,
            content_type: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        self.owner_history.insert(owner.clone());
        self.owners.insert(owner);
        self
    }

    pub fn with_meta(mut self, filename: Option<String>, content_type: Option<String>) -> Self {
        self.filename = filename;
        self.content_type = content_type;
        self
    }

    /// Primary scheme followed by alternatives, in preference order.
    pub fn schemes(&self) -> impl Iterator<Item = &Scheme> {
        std::iter::once(&self.scheme).chain(self.alt.iter())
    }

    pub fn has_scheme(&self, scheme: &Scheme) -> bool {
        self.schemes().any(|s| s == scheme)
    }

    pub fn is_composite(&self) -> bool {
        self.schemes().any(Scheme::is_composite)
    }

    /// Records any representation of this one reads from.
    pub fn base_ids(&self) -> BTreeSet<ContentId> {
        self.schemes().flat_map(Scheme::base_ids).collect()
    }

    /// Payload keys held in the local blob store.
    pub fn local_blob_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .schemes()
            .filter_map(|s| s.local_blob_key(&self.id))
            .collect();
        keys.dedup();
        keys
    }

    /// Payload keys held in an external blob store.
    pub fn external_keys(&self) -> Vec<String> {
        self.schemes()
            .filter_map(|s| s.external_key().map(str::to_string))
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct RecordDoc {
    #[serde(rename = "_id")]
    id: ContentId,
    #[serde(flatten)]
    scheme: SchemeDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    alt: Vec<SchemeDoc>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    refs: BTreeSet<String>,
    #[serde(rename = "refHistory", default, skip_serializing_if = "BTreeSet::is_empty")]
    ref_history: BTreeSet<String>,
    #[serde(rename = "refBase", default, skip_serializing_if = "BTreeSet::is_empty")]
    ref_base: BTreeSet<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

impl TryFrom<RecordDoc> for ContentRecord {
    type Error = StoreError;

    fn try_from(doc: RecordDoc) -> Result<Self, Self::Error> {
        let mut alt = doc
            .alt
            .into_iter()
            .map(Scheme::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let scheme = if doc.scheme.store.as_deref() == Some(TAG_ALT) {
            if alt.is_empty() {
                return Err(StoreError::ReferentialIntegrity(format!(
                    "record {} is stored as alt but lists no alternatives",
                    doc.id
                )));
            }
            alt.remove(0)
        } else {
            Scheme::try_from(doc.scheme)?
        };
        let length = match (doc.length, &scheme) {
            (Some(length), _) => length,
            (None, Scheme::InlineRaw(bytes)) => bytes.len() as u64,
            (None, _) => {
                return Err(StoreError::Serialization(format!(
                    "record {} is missing its length",
                    doc.id
                )))
            }
        };
        Ok(Self {
            id: doc.id,
            length,
            scheme,
            alt,
            owners: doc.refs,
            owner_history: doc.ref_history,
            ref_base: doc.ref_base,
            filename: doc.filename,
            content_type: doc.content_type,
        })
    }
}

impl From<ContentRecord> for RecordDoc {
    fn from(record: ContentRecord) -> Self {
        Self {
            id: record.id,
            scheme: record.scheme.into(),
            length: Some(record.length),
            alt: record.alt.into_iter().map(SchemeDoc::from).collect(),
            refs: record.owners,
            ref_history: record.owner_history,
            ref_base: record.ref_base,
            filename: record.filename,
            content_type: record.content_type,
        }
    }
}
