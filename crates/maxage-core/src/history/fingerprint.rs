//! Payload fingerprints used to decide whether a value changed.

use std::fmt;

use sha2::{Digest, Sha256};

/// Opaque comparison token derived from a response payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({} bytes)", self.0.len())
    }
}

/// Turns a response payload into a [`Fingerprint`].
///
/// Two responses for the same key count as "unchanged" exactly when their
/// fingerprints are equal.
pub trait ChangeDetector: Send + Sync + fmt::Debug {
    fn fingerprint(&self, payload: &[u8]) -> Fingerprint;
}

/// SHA-256 digest of the payload. Keeps 32 bytes per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestDetector;

impl ChangeDetector for DigestDetector {
    fn fingerprint(&self, payload: &[u8]) -> Fingerprint {
        Fingerprint(Sha256::digest(payload).to_vec())
    }
}

/// Byte-for-byte comparison. Keeps a full copy of the last payload per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactDetector;

impl ChangeDetector for ExactDetector {
    fn fingerprint(&self, payload: &[u8]) -> Fingerprint {
        Fingerprint(payload.to_vec())
    }
}
