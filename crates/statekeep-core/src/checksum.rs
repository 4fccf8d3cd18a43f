//! Content checksums for state payloads
//!
//! Provides [`Checksum`], a strongly-typed 32-byte SHA-256 digest used as the
//! optimistic-concurrency token between a session and its backend.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Length of a checksum in bytes
pub const CHECKSUM_LEN: usize = 32;

/// A 32-byte content checksum (SHA-256)
///
/// Always computed over the exact bytes that are transmitted. Equality is
/// treated as "probably unchanged", never as an integrity guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Create a checksum from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// Create checksum from a byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChecksumError> {
        let arr: [u8; CHECKSUM_LEN] = bytes.try_into().map_err(|_| ChecksumError::InvalidLength {
            expected: CHECKSUM_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Compute the checksum of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl serde::Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing checksums
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// Invalid checksum length
    #[error("invalid checksum length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checksum_from_slice_invalid_length() {
        let result = Checksum::from_slice(&[1u8; 16]);
        assert!(matches!(
            result,
            Err(ChecksumError::InvalidLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn checksum_known_vector() {
        // SHA-256 of the empty string
        let empty = Checksum::compute(b"");
        assert_eq!(
            empty.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn checksum_different_data() {
        assert_ne!(Checksum::compute(b"data1"), Checksum::compute(b"data2"));
    }

    #[test]
    fn checksum_display_and_parse() {
        let sum = Checksum::compute(b"test");
        let parsed: Checksum = sum.to_string().parse().unwrap();
        assert_eq!(sum, parsed);
        assert!(sum.to_string().starts_with(&sum.short()));
    }

    #[test]
    fn checksum_rejects_bad_hex() {
        assert!(matches!(
            "zz".parse::<Checksum>(),
            Err(ChecksumError::HexDecode(_))
        ));
    }

    #[test]
    fn checksum_serde_json() {
        let sum = Checksum::compute(b"test");
        let json = serde_json::to_string(&sum).unwrap();
        assert_eq!(json, format!("\"{sum}\""));
        let decoded: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(sum, decoded);
    }

    proptest! {
        #[test]
        fn prop_checksum_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(Checksum::compute(&data), Checksum::compute(&data.clone()));
        }
    }
}
