//! Buffering of incoming content.
//!
//! Small inputs stay in memory; once an input grows past the spool
//! threshold it moves to an anonymous temporary file, which the operating
//! system removes when the handle is dropped on any exit path.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use bytes::Bytes;

/// Writer that buffers in memory up to a threshold, then spills to disk.
pub(crate) struct SpoolWriter {
    threshold: u64,
    memory: Vec<u8>,
    file: Option<File>,
    len: u64,
}

impl SpoolWriter {
    pub(crate) fn new(threshold: u64) -> Self {
        Self {
            threshold,
            memory: Vec::new(),
            file: None,
            len: 0,
        }
    }

    pub(crate) fn finish(mut self) -> io::Result<Spool> {
        match self.file.take() {
            Some(mut file) => {
                file.flush()?;
                Ok(Spool::File {
                    file,
                    len: self.len,
                })
            }
            None => Ok(Spool::Memory(Bytes::from(self.memory))),
        }
    }
}

impl Write for SpoolWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.file.is_none() && self.len + buf.len() as u64 > self.threshold {
            let mut file = tempfile::tempfile()?;
            file.write_all(&self.memory)?;
            self.memory = Vec::new();
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => file.write_all(buf)?,
            None => self.memory.extend_from_slice(buf),
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Fully buffered content, in memory or in a temporary file.
pub(crate) enum Spool {
    Memory(Bytes),
    File { file: File, len: u64 },
}

impl Spool {
    pub(crate) fn len(&self) -> u64 {
        match self {
            Spool::Memory(bytes) => bytes.len() as u64,
            Spool::File { len, .. } => *len,
        }
    }

    /// The buffered bytes, when they are held in memory.
    pub(crate) fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Spool::Memory(bytes) => Some(bytes),
            Spool::File { .. } => None,
        }
    }

    /// Read the buffered content from the start.
    pub(crate) fn reader(&self) -> io::Result<Box<dyn Read + '_>> {
        match self {
            Spool::Memory(bytes) => Ok(Box::new(&bytes[..])),
            Spool::File { file, .. } => {
                let mut handle = file;
                handle.seek(SeekFrom::Start(0))?;
                Ok(Box::new(BufReader::new(handle)))
            }
        }
    }

    /// Materialize the content in memory.
    pub(crate) fn to_bytes(&self) -> io::Result<Bytes> {
        if let Some(bytes) = self.as_bytes() {
            return Ok(bytes.clone());
        }
        let mut out = Vec::with_capacity(usize::try_from(self.len()).unwrap_or(0));
        self.reader()?.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}
