//! Members of stored zip archives.
//!
//! The `zip` crate reads the central directory through a seekable view of
//! the archive's content. Extraction produces content that decodes the
//! member straight out of the archive's bytes; nothing is recompressed or
//! copied.

use std::io::{self, Read, Seek, SeekFrom};

use cask_codec::CodecError;
use cask_types::ContentPointer;
use tracing::debug;
use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive};

use crate::concat::ConcatPiece;
use crate::error::{ContentError, ContentResult};
use crate::read::{ByteStream, Content};
use crate::store::ContentStore;

/// One file inside a stored zip archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipMember {
    pub name: String,
    pub method: CompressionMethod,
    pub compressed_size: u64,
    /// Decoded size.
    pub size: u64,
    /// Archive offset of the member's local header.
    pub header_offset: u64,
    /// Archive offset of the member's compressed bytes.
    pub data_offset: u64,
}

impl ZipMember {
    /// End of the member's compressed bytes, checked against the archive
    /// length.
    fn data_end(&self, archive_len: u64) -> ContentResult<u64> {
        self.data_offset
            .checked_add(self.compressed_size)
            .filter(|end| *end <= archive_len)
            .ok_or_else(|| {
                CodecError::InvalidZipHeader {
                    offset: self.header_offset,
                    reason: format!(
                        "member {} declares {} compressed bytes past offset {}",
                        self.name, self.compressed_size, self.data_offset
                    ),
                }
                .into()
            })
    }
}

impl ContentStore {
    /// List the file members of the archive `pointer` designates.
    ///
    /// Directory entries are skipped.
    pub fn zip_members(&self, pointer: &ContentPointer) -> ContentResult<Vec<ZipMember>> {
        let content = self.open(pointer)?;
        let mut archive = open_archive(&content)?;
        Ok(read_members(&mut archive)?.into_iter().map(|(_, m)| m).collect())
    }

    /// Content equal to the decoded member `name` of the archive `pointer`
    /// designates.
    ///
    /// For stored archives the result references the member's bytes in
    /// place. Members of inline archives are decoded into an inline pointer.
    pub fn extract_zip_member(
        &self,
        pointer: &ContentPointer,
        name: &str,
    ) -> ContentResult<ContentPointer> {
        let content = self.open(pointer)?;
        let mut archive = open_archive(&content)?;
        let (index, member) = read_members(&mut archive)?
            .into_iter()
            .find(|(_, m)| m.name == name)
            .ok_or_else(|| ContentError::ZipMemberNotFound(name.to_string()))?;
        let end = member.data_end(content.length())?;
        debug!(member = name, offset = member.header_offset, end, "extracting zip member");

        match pointer {
            ContentPointer::Stored(stored) => self.calculate_concatenation([ConcatPiece::Zip {
                id: stored.sha,
                offset: member.header_offset,
                end,
            }]),
            ContentPointer::Inline(_) => {
                let mut entry = archive.by_index(index).map_err(zip_error)?;
                let mut decoded = Vec::new();
                io::copy(&mut entry, &mut decoded).map_err(ContentError::from_io)?;
                Ok(ContentPointer::inline(decoded))
            }
        }
    }
}

fn open_archive(content: &Content) -> ContentResult<ZipArchive<ContentCursor<'_>>> {
    ZipArchive::new(ContentCursor::new(content)).map_err(zip_error)
}

fn read_members<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> ContentResult<Vec<(usize, ZipMember)>> {
    let mut members = Vec::new();
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(zip_error)?;
        if file.is_dir() {
            continue;
        }
        members.push((
            index,
            ZipMember {
                name: file.name().to_string(),
                method: file.compression(),
                compressed_size: file.compressed_size(),
                size: file.size(),
                header_offset: file.header_start(),
                data_offset: file.data_start(),
            },
        ));
    }
    Ok(members)
}

fn zip_error(err: ZipError) -> ContentError {
    match err {
        ZipError::Io(e) => ContentError::from_io(e),
        other => CodecError::InvalidArchive(other.to_string()).into(),
    }
}

// ---------------------------------------------------------------------------
// ContentCursor
// ---------------------------------------------------------------------------

/// Seekable view of content. A seek drops the open stream and the next read
/// reopens at the new position.
struct ContentCursor<'a> {
    content: &'a Content,
    position: u64,
    stream: Option<ByteStream>,
}

impl<'a> ContentCursor<'a> {
    fn new(content: &'a Content) -> Self {
        Self {
            content,
            position: 0,
            stream: None,
        }
    }
}

impl Read for ContentCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.content.length();
        if buf.is_empty() || self.position >= length {
            return Ok(0);
        }
        if self.stream.is_none() {
            let stream = self
                .content
                .read(self.position, length - self.position)
                .map_err(ContentError::into_io)?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };
        let n = stream.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ContentCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.content.length().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        if target != self.position {
            self.position = target;
            self.stream = None;
        }
        Ok(target)
    }
}
