use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::TypeError;

/// Content-addressed identifier for a stored byte stream.
///
/// A `ContentId` is the SHA-1 digest of the exact bytes a content record
/// represents, independent of how those bytes are laid out on disk. Identical
/// content always produces the same `ContentId`, which is what makes stored
/// content deduplicatable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 20]);

impl ContentId {
    /// Digest length in bytes.
    pub const LEN: usize = 20;

    /// Compute a `ContentId` from a complete in-memory byte slice.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    /// Create a `ContentId` from a pre-computed digest.
    pub const fn from_hash(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Create a `ContentId` from a slice that must be exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// The raw 20-byte digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a full 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Inclusive bounds of all ids starting with `prefix`.
    ///
    /// The lower bound is the prefix padded with `0x00`, the upper bound the
    /// prefix padded with `0xFF`.
    pub fn prefix_bounds(prefix: &[u8]) -> Result<(Self, Self), TypeError> {
        if prefix.len() > Self::LEN {
            return Err(TypeError::PrefixTooLong(prefix.len()));
        }
        let mut low = [0x00u8; 20];
        let mut high = [0xFFu8; 20];
        low[..prefix.len()].copy_from_slice(prefix);
        high[..prefix.len()].copy_from_slice(prefix);
        Ok((Self(low), Self(high)))
    }

    /// Inclusive bounds for a hex prefix, which may have an odd number of
    /// nibbles. A trailing half byte fixes only the high nibble.
    pub fn hex_prefix_bounds(prefix: &str) -> Result<(Self, Self), TypeError> {
        if !prefix.is_ascii() {
            return Err(TypeError::InvalidHex(prefix.to_string()));
        }
        if prefix.len() > Self::LEN * 2 {
            return Err(TypeError::PrefixTooLong(prefix.len().div_ceil(2)));
        }
        let even = prefix.len() - prefix.len() % 2;
        let whole = hex::decode(&prefix[..even]).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let (mut low, mut high) = Self::prefix_bounds(&whole)?;
        if even < prefix.len() {
            let nibble = u8::from_str_radix(&prefix[even..], 16)
                .map_err(|e| TypeError::InvalidHex(e.to_string()))?;
            low.0[whole.len()] = nibble << 4;
            high.0[whole.len()] = (nibble << 4) | 0x0F;
        }
        Ok((low, high))
    }

    /// Returns `true` if this id starts with the given byte prefix.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.short_hex())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for ContentId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 20]> for ContentId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl From<ContentId> for [u8; 20] {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
