//! Storage error types.

use thiserror::Error;

/// Errors from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O failure (disk, transaction, lock).
    ///
    /// May be transient. The operation had no effect.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded.
    ///
    /// Indicates corruption or a format change. Not transient.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No envelope with this id
    #[error("envelope {message_id} not found")]
    EnvelopeNotFound {
        /// Requested id
        message_id: u64,
    },
}

impl StorageError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
