//! Concatenation engine.
//!
//! Builds composite content out of literal bytes and slices of stored
//! records without copying the referenced bytes. Slices of records that are
//! themselves concatenations are flattened into the underlying pieces, so a
//! stored composite never points at another composite.

use std::io;

use bytes::{Bytes, BytesMut};
use cask_crypto::ContentHasher;
use cask_store::{ContentRecord, Piece, Scheme};
use cask_types::{ContentId, ContentPointer, StoredPointer};
use tracing::debug;

use crate::error::{ContentError, ContentResult};
use crate::read::{ChainReader, MAX_DEPTH};
use crate::store::{ContentMeta, ContentStore};

/// One requested segment of a concatenation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConcatPiece {
    /// Literal bytes.
    Literal(Bytes),
    /// A slice of a stored record; `length: None` runs to its end.
    Base {
        id: ContentId,
        offset: u64,
        length: Option<u64>,
    },
    /// The decoded member of a stored zip archive whose local header starts
    /// at `offset` and whose compressed data ends at `end`.
    Zip { id: ContentId, offset: u64, end: u64 },
}

impl ConcatPiece {
    pub fn literal(bytes: impl Into<Bytes>) -> Self {
        Self::Literal(bytes.into())
    }

    /// The whole of record `id`.
    pub fn whole(id: ContentId) -> Self {
        Self::Base {
            id,
            offset: 0,
            length: None,
        }
    }

    pub fn slice(id: ContentId, offset: u64, length: u64) -> Self {
        Self::Base {
            id,
            offset,
            length: Some(length),
        }
    }
}

impl From<StoredPointer> for ConcatPiece {
    fn from(p: StoredPointer) -> Self {
        Self::slice(p.sha, 0, p.length)
    }
}

impl From<ContentPointer> for ConcatPiece {
    fn from(p: ContentPointer) -> Self {
        match p {
            ContentPointer::Stored(p) => p.into(),
            ContentPointer::Inline(p) => Self::Literal(p.to_bytes()),
        }
    }
}

/// The pieces covering `[offset, offset + length)` of a piece list.
///
/// Pieces before the window are skipped, the first one is shifted if the
/// window starts inside it, and the last one is trimmed if the window ends
/// inside it.
pub fn slice_pieces(pieces: &[Piece], offset: u64, length: u64) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut skip = offset;
    let mut remaining = length;
    for piece in pieces {
        if remaining == 0 {
            break;
        }
        let len = piece.len();
        if skip >= len {
            skip -= len;
            continue;
        }
        let piece = piece.clone().add_offset(skip).trim_to_length(remaining);
        skip = 0;
        remaining -= piece.len();
        out.push(piece);
    }
    out
}

/// Append a piece, merging adjacent literals and dropping empty pieces.
fn push_piece(out: &mut Vec<Piece>, piece: Piece) {
    if piece.is_empty() {
        return;
    }
    if let (Some(Piece::Literal(prev)), Piece::Literal(next)) = (out.last_mut(), &piece) {
        let mut merged = BytesMut::with_capacity(prev.len() + next.len());
        merged.extend_from_slice(prev);
        merged.extend_from_slice(next);
        *prev = merged.freeze();
        return;
    }
    out.push(piece);
}

impl ContentStore {
    /// Build content that is the sequential join of `pieces`.
    ///
    /// Returns an inline pointer when everything collapses into one literal,
    /// the existing record when the result is exactly one whole record, and
    /// otherwise a stored pointer to a (possibly pre-existing) concatenation
    /// record whose id is the digest of the joined bytes.
    pub fn calculate_concatenation(
        &self,
        pieces: impl IntoIterator<Item = ConcatPiece>,
    ) -> ContentResult<ContentPointer> {
        let mut resolved = Vec::new();
        for piece in pieces {
            match piece {
                ConcatPiece::Literal(bytes) => push_piece(&mut resolved, Piece::Literal(bytes)),
                ConcatPiece::Base { id, offset, length } => {
                    let record = self.require_base(&id)?;
                    let length = match length {
                        Some(length) => length,
                        None => record.length.saturating_sub(offset),
                    };
                    if offset.checked_add(length).map_or(true, |end| end > record.length) {
                        return Err(ContentError::InvalidRange {
                            id,
                            offset,
                            length,
                            available: record.length,
                        });
                    }
                    self.resolve_base(&record, offset, length, 0, &mut resolved)?;
                }
                ConcatPiece::Zip { id, offset, end } => {
                    let record = self.require_base(&id)?;
                    if end < offset || end > record.length {
                        return Err(ContentError::InvalidRange {
                            id,
                            offset,
                            length: end.saturating_sub(offset),
                            available: record.length,
                        });
                    }
                    let length = self.zip_member_length(&id, offset, end)?;
                    push_piece(
                        &mut resolved,
                        Piece::Zip {
                            id,
                            offset,
                            end,
                            skip: 0,
                            length,
                        },
                    );
                }
            }
        }

        let mut pieces = Vec::with_capacity(resolved.len());
        for piece in resolved {
            let cost = self.config.reference_cost(piece.has_offset());
            let piece = match piece {
                Piece::Literal(_) => piece,
                reference if reference.len() < cost => {
                    Piece::Literal(Bytes::from(self.backends.materialize(&reference, 0)?))
                }
                reference => reference,
            };
            push_piece(&mut pieces, piece);
        }

        match pieces.as_slice() {
            [] => return Ok(ContentPointer::inline(Bytes::new())),
            [Piece::Literal(bytes)] => return Ok(ContentPointer::inline(bytes.clone())),
            [Piece::Base {
                id,
                offset: 0,
                length,
            }] => {
                if self.require_base(id)?.length == *length {
                    return Ok(ContentPointer::stored(*id, *length));
                }
            }
            _ => {}
        }

        let declared: u64 = pieces.iter().map(Piece::len).sum();
        let mut chain = ChainReader::new(self.backends.clone(), pieces.clone(), 0);
        let (id, length) =
            ContentHasher::hash_reader(&mut chain).map_err(ContentError::from_io)?;
        if length != declared {
            return Err(cask_codec::CodecError::SizeMismatch {
                expected: declared,
                actual: length,
            }
            .into());
        }

        if self.backends.records.exists(&id)? {
            debug!(id = %id, length, "concatenation already stored");
            return Ok(ContentPointer::stored(id, length));
        }
        let count = pieces.len();
        let pointer =
            self.persist_composite(id, length, Scheme::Concatenation(pieces), ContentMeta::default())?;
        debug!(id = %id, length, pieces = count, "stored concatenation");
        Ok(pointer.into())
    }

    /// A base record that must exist for a piece to reference it.
    pub(crate) fn require_base(&self, id: &ContentId) -> ContentResult<ContentRecord> {
        self.backends.records.get(id)?.ok_or_else(|| {
            ContentError::ReferentialIntegrity(format!("base content {id} does not exist"))
        })
    }

    /// Append the pieces for `[offset, offset + length)` of `record`,
    /// flattening concatenations into their own pieces.
    fn resolve_base(
        &self,
        record: &ContentRecord,
        offset: u64,
        length: u64,
        depth: usize,
        out: &mut Vec<Piece>,
    ) -> ContentResult<()> {
        if length == 0 {
            return Ok(());
        }
        let Scheme::Concatenation(inner) = &record.scheme else {
            push_piece(
                out,
                Piece::Base {
                    id: record.id,
                    offset,
                    length,
                },
            );
            return Ok(());
        };
        if depth >= MAX_DEPTH {
            return Err(ContentError::ReferentialIntegrity(format!(
                "content {} nests deeper than {MAX_DEPTH} levels",
                record.id
            )));
        }
        for piece in slice_pieces(inner, offset, length) {
            match piece {
                Piece::Base { id, offset, length } => {
                    let base = self.require_base(&id)?;
                    self.resolve_base(&base, offset, length, depth + 1, out)?;
                }
                other => push_piece(out, other),
            }
        }
        Ok(())
    }

    /// Decoded size of the zip member at `[offset, end)` of `archive`.
    fn zip_member_length(&self, archive: &ContentId, offset: u64, end: u64) -> ContentResult<u64> {
        let (header, mut entry) = self.backends.open_zip_entry(archive, offset, end, 0)?;
        match header.declared_size() {
            Some(size) => Ok(size),
            None => io::copy(&mut entry, &mut io::sink()).map_err(ContentError::from_io),
        }
    }
}
