use std::io::{self, Read, Write};

use cask_types::ContentId;
use sha1::{Digest, Sha1};

const COPY_BUFFER: usize = 64 * 1024;

/// Incremental SHA-1 content hasher.
///
/// Tracks the number of bytes hashed alongside the digest state, so callers
/// learn the exact length of the stream they digested.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha1,
    length: u64,
}

impl ContentHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.length += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Consume the hasher and return the digest.
    pub fn finalize(self) -> ContentId {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.inner.finalize());
        ContentId::from_hash(bytes)
    }

    /// Hash a complete in-memory buffer.
    pub fn hash(data: &[u8]) -> ContentId {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Drain `reader` to EOF, returning its digest and length.
    pub fn hash_reader<R: Read + ?Sized>(reader: &mut R) -> io::Result<(ContentId, u64)> {
        let mut hasher = Self::new();
        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        let length = hasher.length();
        Ok((hasher.finalize(), length))
    }

    /// Verify that data produces the expected content id.
    pub fn verify(data: &[u8], expected: &ContentId) -> bool {
        Self::hash(data) == *expected
    }
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("length", &self.length)
            .finish()
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader adapter that digests every byte read through it.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    /// Bytes read so far.
    pub fn length(&self) -> u64 {
        self.hasher.length()
    }

    /// Finish hashing and return the wrapped reader alongside the digest and
    /// length of everything read so far.
    pub fn finish(self) -> (R, ContentId, u64) {
        let length = self.hasher.length();
        (self.inner, self.hasher.finalize(), length)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Writer adapter that digests every byte written through it.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.hasher.length()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Finish hashing and return the wrapped writer, digest and length.
    pub fn finish(self) -> (W, ContentId, u64) {
        let length = self.hasher.length();
        (self.inner, self.hasher.finalize(), length)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_matches_content_id_digest() {
        let data = b"first chunk second chunk";
        assert_eq!(ContentHasher::hash(data), ContentId::digest(data));
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"first chunk");
        hasher.update(b" second chunk");
        assert_eq!(hasher.length(), 24);
        assert_eq!(hasher.finalize(), ContentId::digest(b"first chunk second chunk"));
    }

    #[test]
    fn hash_reader_reports_length() {
        let data = vec![7u8; 200_000];
        let (id, len) = ContentHasher::hash_reader(&mut data.as_slice()).unwrap();
        assert_eq!(len, 200_000);
        assert_eq!(id, ContentId::digest(&data));
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::hash(b"original");
        assert!(ContentHasher::verify(b"original", &id));
        assert!(!ContentHasher::verify(b"tampered", &id));
    }

    #[test]
    fn hashing_reader_passes_bytes_through() {
        let mut reader = HashingReader::new(&b"pass through"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        let (_, id, len) = reader.finish();
        assert_eq!(out, b"pass through");
        assert_eq!(len, 12);
        assert_eq!(id, ContentId::digest(b"pass through"));
    }

    #[test]
    fn hashing_writer_passes_bytes_through() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"written").unwrap();
        let (inner, id, len) = writer.finish();
        assert_eq!(inner, b"written");
        assert_eq!(len, 7);
        assert_eq!(id, ContentId::digest(b"written"));
    }

    proptest! {
        #[test]
        fn split_point_does_not_change_digest(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            split in 0usize..512,
        ) {
            let split = split.min(data.len());
            let mut hasher = ContentHasher::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finalize(), ContentId::digest(&data));
        }
    }
}
