//! Client error types.

use hushline_crypto::CryptoError;
use hushline_proto::UserId;
use thiserror::Error;

/// Errors returned by [`Client::handle`](crate::Client::handle).
///
/// Failures that belong to a single message (undecipherable envelope,
/// missing sender key) are not errors: they become a
/// [`MessageBody`](crate::MessageBody) state so one bad envelope never aborts
/// a conversation view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No usable public key for a peer, and automatic fetching is paused
    /// after repeated failures.
    ///
    /// Transient: `RetryKeyFetch` tries again.
    #[error("no usable public key for user {peer}")]
    KeyUnavailable {
        /// Peer without a key
        peer: UserId,
    },

    /// Fallback was requested for a peer that has not hit the failure
    /// threshold.
    #[error("fallback not offered for user {peer}")]
    FallbackNotOffered {
        /// Peer in question
        peer: UserId,
    },

    /// Message rejected before sending
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong
        reason: String,
    },

    /// Request needs `Connect` first
    #[error("not connected")]
    NotConnected,

    /// Local cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ClientError {
    /// Returns true if the same event may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeyUnavailable { .. } | Self::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ClientError::KeyUnavailable { peer: 1 }.is_transient());
        assert!(ClientError::NotConnected.is_transient());
        assert!(!ClientError::FallbackNotOffered { peer: 1 }.is_transient());
        assert!(!ClientError::Crypto(CryptoError::Decrypt).is_transient());
    }
}
