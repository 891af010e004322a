//! Client events and actions.

use hushline_crypto::Fingerprint;
use hushline_proto::{ClientFrame, ErrorCode, MessageId, Receipt, ServerFrame, Timestamp, UserId};

use crate::conversation::RenderedMessage;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving frames from the network
/// - Forwarding application intents (send message, open conversation, etc.)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Bind the connection to our user id.
    Connect,

    /// Upload our public key to the directory.
    PublishKey,

    /// Check that the directory holds our current key; replace it if not.
    VerifyOwnKey,

    /// Application wants to send a message.
    SendMessage {
        /// Reader.
        recipient: UserId,
        /// Message text.
        text: String,
    },

    /// User opened a conversation.
    ///
    /// Makes it the active conversation, fetches the peer key if needed and
    /// refreshes the history.
    OpenConversation {
        /// Other party.
        peer: UserId,
    },

    /// Reload a conversation's history. Debounced.
    RefreshConversation {
        /// Other party.
        peer: UserId,
    },

    /// Pull envelopes addressed to us, recovering any missed pushes.
    FetchInbox,

    /// User read a message.
    MarkRead {
        /// Envelope id.
        message_id: MessageId,
    },

    /// Delete the whole conversation on the relay.
    ClearConversation {
        /// Other party.
        peer: UserId,
    },

    /// User accepted the unencrypted fallback offer.
    ConfirmFallback {
        /// Peer whose key cannot be obtained.
        peer: UserId,
    },

    /// User turned fallback off.
    DisableFallback {
        /// Peer in fallback.
        peer: UserId,
    },

    /// Fetch a peer key even though automatic fetching is paused.
    RetryKeyFetch {
        /// Peer to retry.
        peer: UserId,
    },

    /// Frame received from the relay.
    FrameReceived(ServerFrame),
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a frame to the relay.
    Send(ClientFrame),

    /// The relay accepted our identity.
    Connected {
        /// Bound identity.
        user_id: UserId,
    },

    /// Our public key was stored.
    KeyPublished {
        /// Fingerprint computed by the relay.
        fingerprint: String,
        /// False if a previous key was replaced.
        created: bool,
    },

    /// Our stored key was missing or corrupt; a new pair was generated and
    /// uploaded.
    ///
    /// Messages sealed under the previous pair can no longer be read.
    KeyRegenerated {
        /// Key pair generation, starting at 1.
        generation: u32,
        /// Fingerprint computed by the relay.
        fingerprint: String,
    },

    /// The relay holds our current key.
    KeyVerified {
        /// Local fingerprint.
        fingerprint: Fingerprint,
    },

    /// A usable key for a peer was cached.
    PeerKeyAvailable {
        /// Key owner.
        peer: UserId,
        /// Fingerprint for out-of-band verification.
        fingerprint: Fingerprint,
        /// True if it replaced a different cached key.
        changed: bool,
    },

    /// A peer key fetch missed or returned an unusable key.
    PeerKeyUnavailable {
        /// Key owner.
        peer: UserId,
        /// Consecutive failures.
        failures: u32,
        /// What went wrong.
        reason: String,
    },

    /// Key fetching for a peer failed repeatedly.
    ///
    /// The application should ask the user whether to send unencrypted.
    /// Nothing changes until `ConfirmFallback`.
    FallbackAvailable {
        /// Peer without a key.
        peer: UserId,
        /// Consecutive failures.
        failures: u32,
    },

    /// Messages to this peer are now sent unencrypted.
    FallbackEnabled {
        /// Peer in fallback.
        peer: UserId,
    },

    /// Messages to this peer are encrypted again.
    FallbackDisabled {
        /// Peer leaving fallback.
        peer: UserId,
    },

    /// The relay accepted a message.
    MessageSent {
        /// Reader.
        recipient: UserId,
        /// Assigned id.
        message_id: MessageId,
        /// Acceptance time.
        created_at: Timestamp,
        /// True if sent without encryption.
        fallback: bool,
    },

    /// A message could not be sent.
    MessageFailed {
        /// Intended reader.
        recipient: UserId,
        /// Text, returned so the application can offer a retry.
        text: String,
        /// What went wrong.
        reason: String,
    },

    /// A message is new in a conversation, or was re-rendered after the
    /// sender's key arrived.
    MessageRendered {
        /// Conversation.
        peer: UserId,
        /// Rendered message.
        message: RenderedMessage,
    },

    /// Delivery state of a message changed.
    ReceiptUpdated {
        /// Conversation.
        peer: UserId,
        /// New state.
        receipt: Receipt,
    },

    /// A conversation was deleted.
    ConversationCleared {
        /// Other party.
        peer: UserId,
        /// True if the peer cleared it.
        by_peer: bool,
        /// Messages removed.
        deleted: u64,
    },

    /// The relay rejected a request.
    RequestFailed {
        /// Request name.
        request: &'static str,
        /// Error class.
        code: ErrorCode,
        /// Relay message.
        message: String,
    },

    /// Log message for debugging.
    Log {
        /// Log message.
        message: String,
    },
}
