//! State payloads exchanged with backends

use crate::checksum::Checksum;
use crate::error::ClientError;

/// Opaque state bytes plus the checksum of those bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Serialized state
    pub data: Vec<u8>,
    /// Checksum reported alongside `data`
    pub checksum: Checksum,
}

impl Payload {
    /// Create a payload, computing the checksum from the data
    #[inline]
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let checksum = Checksum::compute(&data);
        Self { data, checksum }
    }

    /// Create a payload from data and a checksum reported by a backend
    ///
    /// The checksum is not trusted; call [`Payload::verify`] before use.
    #[inline]
    #[must_use]
    pub fn with_reported_checksum(data: Vec<u8>, checksum: Checksum) -> Self {
        Self { data, checksum }
    }

    /// Recompute the checksum from the data and compare with the reported one
    ///
    /// # Errors
    /// Returns [`ClientError::CorruptPayload`] on mismatch
    pub fn verify(&self) -> Result<Checksum, ClientError> {
        let computed = Checksum::compute(&self.data);
        if computed == self.checksum {
            Ok(computed)
        } else {
            Err(ClientError::CorruptPayload {
                stored: self.checksum,
                computed,
            })
        }
    }

    /// Payload size in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is present but empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of fetching state from a backend
///
/// `NotFound` means no state was ever stored, which is distinct from a stored
/// empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// No state stored
    NotFound,
    /// Stored state
    Found(Payload),
}

impl Fetched {
    /// Borrow the payload, if any
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::NotFound => None,
            Self::Found(payload) => Some(payload),
        }
    }

    /// Take the payload, if any
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::NotFound => None,
            Self::Found(payload) => Some(payload),
        }
    }

    /// Whether no state exists
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<Option<Payload>> for Fetched {
    fn from(value: Option<Payload>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_not_absent() {
        let fetched = Fetched::Found(Payload::new(Vec::new()));
        assert!(!fetched.is_not_found());
        assert!(fetched.payload().unwrap().is_empty());
        assert!(Fetched::from(None).is_not_found());
    }

    #[test]
    fn verify_detects_tampered_data() {
        let mut payload = Payload::new(b"{\"version\":1}".to_vec());
        assert!(payload.verify().is_ok());

        payload.data.push(b' ');
        assert!(matches!(
            payload.verify(),
            Err(ClientError::CorruptPayload { .. })
        ));
    }

    #[test]
    fn reported_checksum_is_kept_until_verified() {
        let bogus = Checksum::compute(b"other");
        let payload = Payload::with_reported_checksum(b"data".to_vec(), bogus);
        assert_eq!(payload.checksum, bogus);
        assert!(payload.verify().is_err());
    }
}
