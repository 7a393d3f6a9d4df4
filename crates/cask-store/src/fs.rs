//! Filesystem blob store.
//!
//! Each blob is one file, sharded by the first two characters of its key:
//!
//! ```text
//! <root>/
//!   <key[..2]>/
//!     <key>
//! ```
//!
//! Writes go to a temporary file in the shard directory and are renamed into
//! place, so a reader never observes a partially written blob.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{validate_blob_key, BlobStore};

/// Blob store rooted at a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_blob_key(key)?;
        let shard = &key[..key.len().min(2)];
        Ok(self.root.join(shard).join(key))
    }
}

fn not_found_as<T>(result: io::Result<T>, key: &str) -> StoreResult<T> {
    result.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::BlobNotFound(key.to_string())
        } else {
            StoreError::Io(e)
        }
    })
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, reader: &mut dyn Read) -> StoreResult<u64> {
        let path = self.path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        let written = io::copy(reader, temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        debug!(key, bytes = written, "wrote blob");
        Ok(written)
    }

    fn open(&self, key: &str, offset: u64) -> StoreResult<Box<dyn Read + Send>> {
        let path = self.path(key)?;
        let mut file = not_found_as(File::open(&path), key)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(BufReader::new(file)))
    }

    fn size(&self, key: &str) -> StoreResult<Option<u64>> {
        let path = self.path(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            // In-flight temporaries start with a dot.
            if validate_blob_key(name).is_ok() {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
