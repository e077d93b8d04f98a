//! Identity fingerprints.
//!
//! A fingerprint is SHA-256 over the raw public key bytes, rendered as
//! lowercase hex in colon-separated byte groups (`ab:cd:ef:...`). The same key
//! bytes always produce the same string on every platform.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;

/// Human-verifiable fingerprint of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint raw public key bytes.
    pub fn of_bytes(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        Self(digest.chunks(1).map(hex::encode).collect::<Vec<_>>().join(":"))
    }

    /// Decode a base64 public key and fingerprint it.
    pub fn of_base64(public_key_b64: &str) -> Result<Self, DecodeError> {
        let bytes = STANDARD.decode(public_key_b64)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// The colon-grouped hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the colon-grouped hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
