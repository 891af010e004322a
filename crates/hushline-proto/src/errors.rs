//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from decoding or encoding wire data.
///
/// None of these carry cryptographic meaning: they describe structure only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is not valid JSON for the expected type
    #[error("malformed frame: {reason}")]
    Json {
        /// Parser message
        reason: String,
    },

    /// Frame exceeds the maximum size
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Envelope field is not valid base64url
    #[error("field {field} is not valid base64url")]
    Base64 {
        /// Name of the offending field
        field: &'static str,
    },

    /// Envelope type tag disagrees with its contents
    #[error("inconsistent envelope: {reason}")]
    InconsistentEnvelope {
        /// What disagrees
        reason: String,
    },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json { reason: err.to_string() }
    }
}
