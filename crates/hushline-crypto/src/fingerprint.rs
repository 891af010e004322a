//! Public key fingerprints for out-of-band identity verification.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::keypair::PublicKey;

/// Lowercase hex SHA-256 of a key's canonical DER encoding.
///
/// Computed over the decoded key rather than its text form, so two uploads of
/// the same key that differ only in whitespace or armor share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a public key.
    pub fn of(key: &PublicKey) -> Self {
        let digest = Sha256::digest(key.to_spki_der());
        Self(hex::encode(digest))
    }

    /// Hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
