//! Gzip-wrapped DEFLATE for streamed blob payloads.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{CodecError, CodecResult};
use crate::exact::ExactReader;

/// Gzip `data` in memory. Returns `None` unless the result is smaller.
pub fn try_gzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).ok()?;
    let compressed = encoder.finish().ok()?;
    (compressed.len() < data.len()).then_some(compressed)
}

/// Stream-compress `reader` into `writer`, returning the compressed size.
pub fn gzip_stream<R, W>(reader: &mut R, writer: W) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut encoder = GzEncoder::new(CountingWriter { inner: writer, count: 0 }, Compression::best());
    io::copy(reader, &mut encoder)?;
    let counting = encoder.finish()?;
    Ok(counting.count)
}

/// Decode a gzip stream that must produce exactly `expected_len` bytes.
pub fn gzip_reader<R: Read>(reader: R, expected_len: u64) -> ExactReader<GzDecoder<R>> {
    ExactReader::new(GzDecoder::new(reader), expected_len)
}

/// Decode an in-memory gzip payload of known decoded length.
pub fn gunzip(data: &[u8], expected_len: u64) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    gzip_reader(data, expected_len)
        .read_to_end(&mut out)
        .map_err(CodecError::from_io)?;
    Ok(out)
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
