//! Content fingerprints.
//!
//! A fingerprint is the SHA-256 digest of the CBOR encoding of an entity's
//! shape. Shapes hold only ordered collections, so equal content always
//! produces equal bytes and the digest can stand in for a field-by-field diff.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// SHA-256 digest of an entity's canonical content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Computes the fingerprint of any serializable shape.
pub fn fingerprint<T: Serialize>(shape: &T) -> CoreResult<Fingerprint> {
    let mut bytes = Vec::new();
    ciborium::into_writer(shape, &mut bytes).map_err(|e| CoreError::encoding(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    Ok(Fingerprint(digest.into()))
}
