//! In-place decoding of single zip members.
//!
//! A stored zip archive is never re-encoded. To expose one member as content
//! the engine records where the member's local header starts and where its
//! compressed data ends; reading parses the local header at that offset and
//! inflates the data that follows. Listing archives is left to the `zip`
//! crate, which needs random access; this module only ever reads forward.
//!
//! Local header layout (integers little-endian):
//!
//! ```text
//! PK\x03\x04 ver flags method time date crc csize usize nlen xlen name extra
//! ```

use std::io::{self, Read};

use flate2::read::DeflateDecoder;

use crate::error::{CodecError, CodecResult};

const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_FIXED_LEN: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// Size field value deferring to a zip64 extra field.
const U32_SENTINEL: u64 = u32::MAX as u64;

fn u16_at(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn u32_at(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

fn invalid(offset: u64, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidZipHeader {
        offset,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Local header
// ---------------------------------------------------------------------------

/// Parsed local file header of one archive member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalHeader {
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    /// Compressed size as written in the header; `u32::MAX` for zip64.
    pub compressed_size: u64,
    /// Decoded size as written in the header; `u32::MAX` for zip64.
    pub uncompressed_size: u64,
    pub name: String,
    /// Total header length including name and extra field.
    pub header_len: u64,
}

impl LocalHeader {
    /// Read a local header from the start of `reader`.
    ///
    /// `offset` is only used to label errors.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, offset: u64) -> CodecResult<Self> {
        let mut fixed = [0u8; LOCAL_FIXED_LEN];
        reader.read_exact(&mut fixed).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid(offset, "truncated local header")
            } else {
                CodecError::Io(e)
            }
        })?;
        if u32_at(&fixed, 0) != LOCAL_SIGNATURE {
            return Err(invalid(offset, "bad local header signature"));
        }
        let name_len = u16_at(&fixed, 26) as usize;
        let extra_len = u16_at(&fixed, 28) as usize;
        let mut variable = vec![0u8; name_len + extra_len];
        reader.read_exact(&mut variable).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                invalid(offset, "truncated local header name or extra field")
            } else {
                CodecError::Io(e)
            }
        })?;

        Ok(Self {
            flags: u16_at(&fixed, 6),
            method: u16_at(&fixed, 8),
            crc32: u32_at(&fixed, 14),
            compressed_size: u32_at(&fixed, 18) as u64,
            uncompressed_size: u32_at(&fixed, 22) as u64,
            name: String::from_utf8_lossy(&variable[..name_len]).into_owned(),
            header_len: (LOCAL_FIXED_LEN + name_len + extra_len) as u64,
        })
    }

    /// Parse a local header from an in-memory buffer.
    pub fn parse(buf: &[u8], offset: u64) -> CodecResult<Self> {
        let mut cursor = buf;
        Self::read_from(&mut cursor, offset)
    }

    /// Sizes and CRC live in a trailing data descriptor instead of the header.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Decoded member size, when the header declares it.
    ///
    /// Zip64 members keep their sizes in an extra field and report `None`.
    pub fn declared_size(&self) -> Option<u64> {
        (!self.has_data_descriptor() && self.uncompressed_size != U32_SENTINEL)
            .then_some(self.uncompressed_size)
    }
}

// ---------------------------------------------------------------------------
// Member reader
// ---------------------------------------------------------------------------

/// Streams the decoded bytes of one zip member.
///
/// Constructed over a reader positioned just past the member's local header,
/// it reads exactly `compressed_len` bytes and decodes them according to the
/// header's method. When the header carries the CRC and size, both are
/// verified once the member is fully read.
pub struct ZipEntryReader<'a> {
    inner: Box<dyn Read + Send + 'a>,
    crc: crc32fast::Hasher,
    produced: u64,
    expected_crc: Option<u32>,
    expected_len: Option<u64>,
    finished: bool,
}

impl<'a> ZipEntryReader<'a> {
    pub fn new<R: Read + Send + 'a>(
        data: R,
        header: &LocalHeader,
        compressed_len: u64,
    ) -> CodecResult<Self> {
        let limited = data.take(compressed_len);
        let inner: Box<dyn Read + Send + 'a> = match header.method {
            METHOD_STORED => Box::new(limited),
            METHOD_DEFLATED => Box::new(DeflateDecoder::new(limited)),
            other => return Err(CodecError::UnsupportedZipMethod(other)),
        };
        let declared = !header.has_data_descriptor();
        Ok(Self {
            inner,
            crc: crc32fast::Hasher::new(),
            produced: 0,
            expected_crc: declared.then_some(header.crc32),
            expected_len: header.declared_size(),
            finished: false,
        })
    }

    fn verify(&mut self) -> io::Result<()> {
        self.finished = true;
        if let Some(expected) = self.expected_len {
            if expected != self.produced {
                return Err(CodecError::SizeMismatch {
                    expected,
                    actual: self.produced,
                }
                .into_io());
            }
        }
        if let Some(expected) = self.expected_crc {
            let computed = std::mem::take(&mut self.crc).finalize();
            if computed != expected {
                return Err(CodecError::CrcMismatch { expected, computed }.into_io());
            }
        }
        Ok(())
    }
}

impl Read for ZipEntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.verify()?;
            return Ok(0);
        }
        self.crc.update(&buf[..n]);
        self.produced += n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for ZipEntryReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipEntryReader")
            .field("produced", &self.produced)
            .field("expected_len", &self.expected_len)
            .finish()
    }
}
