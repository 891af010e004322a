//! Error taxonomy for key handling and message encryption.

use thiserror::Error;

/// Errors produced by the cryptographic core.
///
/// The variants follow the recovery paths available to a caller:
///
/// - [`Encoding`](Self::Encoding): transport corruption of text key material.
///   Recoverable by sanitizing and retrying.
/// - [`Import`](Self::Import) and [`Agreement`](Self::Agreement): the key is
///   structurally invalid or incompatible. Only a fresh upload by the key's
///   owner fixes this.
/// - [`Decrypt`](Self::Decrypt): authentication or structural failure of a
///   sealed message. Never retried with the same inputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Text encoding of key material could not be decoded
    #[error("encoding error: {reason}")]
    Encoding {
        /// What was wrong with the encoding
        reason: String,
    },

    /// Decoded bytes are not a valid public key for the fixed algorithm
    #[error("key import failed: {reason}")]
    Import {
        /// Why the key was rejected
        reason: String,
    },

    /// Key agreement could not produce a usable shared secret
    #[error("key agreement failed: {reason}")]
    Agreement {
        /// Why agreement was rejected
        reason: String,
    },

    /// The AEAD refused to seal the plaintext
    #[error("message could not be encrypted")]
    Encrypt,

    /// Sealed message failed authentication or was malformed.
    ///
    /// Carries no detail: wrong key and corrupted payload are
    /// indistinguishable to the caller.
    #[error("message could not be decrypted")]
    Decrypt,
}

impl CryptoError {
    /// Returns true if sanitize-and-retry can recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Encoding { .. })
    }

    /// Returns true if only a new key from the peer resolves this error.
    pub fn requires_new_peer_key(&self) -> bool {
        matches!(self, Self::Import { .. } | Self::Agreement { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let encoding = CryptoError::Encoding { reason: "bad padding".to_string() };
        assert!(encoding.is_recoverable());
        assert!(!encoding.requires_new_peer_key());

        let import = CryptoError::Import { reason: "wrong length".to_string() };
        assert!(!import.is_recoverable());
        assert!(import.requires_new_peer_key());

        let agreement = CryptoError::Agreement { reason: "low order point".to_string() };
        assert!(agreement.requires_new_peer_key());

        assert!(!CryptoError::Decrypt.is_recoverable());
        assert!(!CryptoError::Decrypt.requires_new_peer_key());

        assert!(!CryptoError::Encrypt.is_recoverable());
        assert!(!CryptoError::Encrypt.requires_new_peer_key());
    }

    #[test]
    fn decrypt_error_has_no_detail() {
        assert_eq!(CryptoError::Decrypt.to_string(), "message could not be decrypted");
    }
}
