use std::io::{self, Read};

use crate::error::CodecError;

/// Reader that enforces a declared decoded length.
///
/// Yields at most `expected` bytes. If the inner reader ends early, or still
/// has data once `expected` bytes were produced, the read fails with a
/// [`CodecError::SizeMismatch`] wrapped in an `io::Error`.
#[derive(Debug)]
pub struct ExactReader<R> {
    inner: R,
    expected: u64,
    produced: u64,
    checked_end: bool,
}

impl<R: Read> ExactReader<R> {
    pub fn new(inner: R, expected: u64) -> Self {
        Self {
            inner,
            expected,
            produced: 0,
            checked_end: false,
        }
    }

    /// Declared length of the decoded stream.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn mismatch(&self, actual: u64) -> io::Error {
        CodecError::SizeMismatch {
            expected: self.expected,
            actual,
        }
        .into_io()
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.expected - self.produced;
        if remaining == 0 {
            if !self.checked_end {
                self.checked_end = true;
                let mut next = [0u8; 1];
                let extra = self.inner.read(&mut next)?;
                if extra > 0 {
                    let tail = io::copy(&mut self.inner, &mut io::sink())?;
                    return Err(self.mismatch(self.produced + extra as u64 + tail));
                }
            }
            return Ok(0);
        }
        let cap = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..cap])?;
        if n == 0 {
            return Err(self.mismatch(self.produced));
        }
        self.produced += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_length_passes() {
        let mut out = Vec::new();
        ExactReader::new(&b"12345"[..], 5).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"12345");
    }

    #[test]
    fn short_stream_fails() {
        let mut out = Vec::new();
        let err = ExactReader::new(&b"123"[..], 5).read_to_end(&mut out).unwrap_err();
        let codec = CodecError::from_io(err);
        assert!(matches!(codec, CodecError::SizeMismatch { expected: 5, actual: 3 }));
    }

    #[test]
    fn long_stream_fails() {
        let mut out = Vec::new();
        let err = ExactReader::new(&b"1234567"[..], 5).read_to_end(&mut out).unwrap_err();
        let codec = CodecError::from_io(err);
        assert!(matches!(codec, CodecError::SizeMismatch { expected: 5, actual: 7 }));
    }

    #[test]
    fn partial_read_skips_end_check() {
        let mut reader = ExactReader::new(&b"1234567"[..], 5);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"123");
    }

    #[test]
    fn failing_tail_surfaces_its_error() {
        let tail = io::Cursor::new(b"1234567".to_vec()).chain(Broken);
        let mut out = Vec::new();
        let err = ExactReader::new(tail, 5).read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(matches!(CodecError::from_io(err), CodecError::Io(_)));
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "backend went away"))
        }
    }
}
