//! Raw DEFLATE (no zlib or gzip framing) for small inline payloads.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{CodecError, CodecResult};
use crate::exact::ExactReader;

/// Compress `data` with raw DEFLATE at the best compression level.
///
/// Returns `None` unless the encoded form is strictly smaller than `limit`.
/// Callers that only want an improvement pass `data.len()`.
pub fn try_deflate(data: &[u8], limit: usize) -> Option<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(limit), Compression::best());
    if encoder.write_all(data).is_err() {
        return None;
    }
    let compressed = encoder.finish().ok()?;
    (compressed.len() < limit).then_some(compressed)
}

/// Inverse of [`try_deflate`]; the output must be exactly `expected_len` bytes.
pub fn inflate(data: &[u8], expected_len: u64) -> CodecResult<Vec<u8>> {
    let capacity = usize::try_from(expected_len).unwrap_or(0);
    let mut out = Vec::with_capacity(capacity);
    ExactReader::new(DeflateDecoder::new(data), expected_len)
        .read_to_end(&mut out)
        .map_err(CodecError::from_io)?;
    Ok(out)
}
