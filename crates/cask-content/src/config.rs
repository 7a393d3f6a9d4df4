use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ContentError, ContentResult};

/// Tuning for representation selection on the write path.
///
/// Passed explicitly to [`ContentStore::new`](crate::ContentStore::new).
/// Every field has a default, so a TOML file only needs to name the values
/// it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Content up to this many bytes is kept inside the record.
    pub inline_threshold: u64,
    /// Incompressible content above this size is split into chunks of at
    /// most this many bytes.
    pub chunk_size: u64,
    /// Gzip is kept only when it saves more than this many bytes.
    pub gzip_overhead: u64,
    /// Inputs larger than this spool to a temporary file while hashing.
    pub spool_threshold: u64,
    /// Referenced pieces shorter than this are copied into the record.
    pub reference_overhead: u64,
    /// Extra cost of a reference that carries an offset.
    pub offset_overhead: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 256,
            chunk_size: 256 * 1024,
            gzip_overhead: 64,
            spool_threshold: 1024 * 1024,
            reference_overhead: 30,
            offset_overhead: 7,
        }
    }
}

impl StoreConfig {
    /// Reject settings the write path cannot honor.
    pub fn validate(&self) -> ContentResult<()> {
        if self.chunk_size == 0 {
            return Err(ContentError::Config("chunk_size must be positive".into()));
        }
        if self.inline_threshold >= self.chunk_size {
            return Err(ContentError::Config(format!(
                "inline_threshold ({}) must be smaller than chunk_size ({})",
                self.inline_threshold, self.chunk_size
            )));
        }
        if usize::try_from(self.chunk_size).is_err() {
            return Err(ContentError::Config(format!(
                "chunk_size ({}) does not fit in memory",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> ContentResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ContentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ContentResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> ContentResult<String> {
        toml::to_string(self).map_err(|e| ContentError::Config(e.to_string()))
    }

    /// Encoded cost of a reference piece.
    pub(crate) fn reference_cost(&self, has_offset: bool) -> u64 {
        if has_offset {
            self.reference_overhead + self.offset_overhead
        } else {
            self.reference_overhead
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.inline_threshold, 256);
        assert_eq!(c.chunk_size, 256 * 1024);
        assert_eq!(c.reference_cost(false), 30);
        assert_eq!(c.reference_cost(true), 37);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = StoreConfig::from_toml_str("chunk_size = 4096\ngzip_overhead = 0\n").unwrap();
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.gzip_overhead, 0);
        assert_eq!(c.inline_threshold, 256);
    }

    #[test]
    fn toml_roundtrip() {
        let c = StoreConfig {
            spool_threshold: 10,
            ..StoreConfig::default()
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = StoreConfig::from_toml_str("chunk_size = 0").unwrap_err();
        assert!(matches!(err, ContentError::Config(_)));
    }

    #[test]
    fn rejects_inline_threshold_above_chunk_size() {
        let c = StoreConfig {
            inline_threshold: 1024,
            chunk_size: 512,
            ..StoreConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cask.toml");
        std::fs::write(&path, "inline_threshold = 64\n").unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap().inline_threshold, 64);
    }
}
