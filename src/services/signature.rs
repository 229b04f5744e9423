//! Content-identity signatures for object payloads.
//!
//! Every stored payload is tagged with a digest and the name of the
//! algorithm that produced it, so the algorithm can change without
//! invalidating rows written earlier.

use sha2::{Digest, Sha256};

/// Method tag recorded next to SHA-256 signatures.
pub const SHA256: &str = "sha256";

/// A computed signature and the algorithm tag it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub value: String,
    pub method: &'static str,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureCodec;

impl SignatureCodec {
    /// Sign an in-memory payload. Lowercase hex SHA-256.
    pub fn sign(&self, payload: &[u8]) -> Signature {
        Signature {
            value: hex::encode(Sha256::digest(payload)),
            method: SHA256,
        }
    }
}
