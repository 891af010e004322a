//! Public key directory.
//!
//! One current public key per user, last-write-wins. Uploaded text is
//! sanitized and imported before anything is stored, then re-encoded as
//! canonical PEM so the stored form and the fingerprint depend only on the
//! key itself. Client-supplied fingerprints are never trusted.

use hushline_crypto::{Algorithm, CryptoError, Fingerprint, encode_pem, import_public_key};
use hushline_proto::{KeyRecord, Timestamp, UserId};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// Errors from key directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyDirectoryError {
    /// Uploaded text is not a usable public key for the named algorithm
    #[error("invalid public key: {reason}")]
    InvalidKey {
        /// What was wrong with it
        reason: String,
    },

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CryptoError> for KeyDirectoryError {
    fn from(err: CryptoError) -> Self {
        Self::InvalidKey { reason: err.to_string() }
    }
}

/// Result of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpload {
    /// Record as stored
    pub record: KeyRecord,
    /// True if the user had no key before
    pub created: bool,
}

/// Key directory over a storage backend.
#[derive(Debug, Clone)]
pub struct KeyDirectory<S> {
    storage: S,
}

impl<S: Storage> KeyDirectory<S> {
    /// Create a directory over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Validate and store `owner`'s public key.
    ///
    /// Replaces any previous key. `created_at` survives the replacement,
    /// `updated_at` is set to `now`.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if the algorithm tag is unknown or the key fails to
    ///   import after sanitization
    /// - `Storage` if the backend fails; the previous key is left in place
    pub fn upload(
        &self,
        owner: UserId,
        public_key: &str,
        algorithm: &str,
        now: Timestamp,
    ) -> Result<KeyUpload, KeyDirectoryError> {
        let algorithm = Algorithm::parse(algorithm)?;
        let key = import_public_key(public_key)?;

        if key.algorithm() != algorithm {
            return Err(KeyDirectoryError::InvalidKey {
                reason: format!("key is {}, upload claims {algorithm}", key.algorithm()),
            });
        }

        let previous = self.storage.load_public_key(owner)?;
        let record = KeyRecord {
            user_id: owner,
            public_key: encode_pem(&key),
            fingerprint: Fingerprint::of(&key).into_string(),
            algorithm: algorithm.as_str().to_string(),
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };

        self.storage.store_public_key(&record)?;

        Ok(KeyUpload { record, created: previous.is_none() })
    }

    /// Current key of `owner`, if any.
    pub fn lookup(&self, owner: UserId) -> Result<Option<KeyRecord>, KeyDirectoryError> {
        Ok(self.storage.load_public_key(owner)?)
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use hushline_crypto::KeyPairStore;

    use super::*;
    use crate::storage::MemoryStorage;

    fn pem(seed: u8) -> String {
        KeyPairStore::generate([seed; 32]).export_public_pem()
    }

    #[test]
    fn upload_then_lookup() {
        let directory = KeyDirectory::new(MemoryStorage::new());

        let upload = directory.upload(7, &pem(1), "X25519", 1_000).unwrap();
        assert!(upload.created);
        assert_eq!(upload.record.fingerprint.len(), 64);

        let stored = directory.lookup(7).unwrap().unwrap();
        assert_eq!(stored, upload.record);
        assert_eq!(directory.lookup(8).unwrap(), None);
    }

    #[test]
    fn overwrite_preserves_created_at() {
        let directory = KeyDirectory::new(MemoryStorage::new());

        let first = directory.upload(7, &pem(1), "X25519", 1_000).unwrap();
        let second = directory.upload(7, &pem(2), "x25519", 2_000).unwrap();

        assert!(!second.created);
        assert_eq!(second.record.created_at, 1_000);
        assert_eq!(second.record.updated_at, 2_000);
        assert_ne!(first.record.fingerprint, second.record.fingerprint);
        assert_eq!(directory.lookup(7).unwrap(), Some(second.record));
    }

    #[test]
    fn stored_key_is_canonical() {
        let directory = KeyDirectory::new(MemoryStorage::new());
        let clean = pem(3);
        let mangled = clean.replace('\n', " \r\n\t ");

        let upload = directory.upload(7, &mangled, "X25519", 1).unwrap();
        assert_eq!(upload.record.public_key, clean);
    }

    #[test]
    fn rejects_garbage_and_unknown_algorithm() {
        let directory = KeyDirectory::new(MemoryStorage::new());

        assert!(matches!(
            directory.upload(7, "not a key", "X25519", 1),
            Err(KeyDirectoryError::InvalidKey { .. })
        ));
        assert!(matches!(
            directory.upload(7, &pem(1), "P-256", 1),
            Err(KeyDirectoryError::InvalidKey { .. })
        ));
        assert_eq!(directory.lookup(7).unwrap(), None);
    }
}
