//! Requests, responses and pushes exchanged between client and relay.
//!
//! Every frame is a single JSON object. Clients send [`ClientFrame`]s carrying
//! a caller-chosen `request_id`; the relay answers each one with exactly one
//! [`ServerFrame::Response`] echoing that id, and may interleave
//! [`ServerFrame::Push`] frames at any time.

use serde::{Deserialize, Serialize};

use crate::{
    envelope::{EnvelopeKind, WireEnvelope},
    limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
};

/// User identity.
pub type UserId = u64;

/// Relay-assigned message identity. Strictly increasing, never reused.
pub type MessageId = u64;

/// Unix epoch milliseconds.
pub type Timestamp = u64;

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Pagination window, clamped to [`MAX_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum number of records
    pub limit: u32,
    /// Records to skip
    pub offset: u32,
}

impl Page {
    /// Build a page, clamping `limit`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit: limit.min(MAX_PAGE_SIZE), offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_SIZE, offset: 0 }
    }
}

/// Client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Bind this connection to a user identity
    Hello {
        /// Identity asserted by the session service
        user_id: UserId,
    },
    /// Publish (or replace) the caller's public key
    UploadKey {
        /// PEM text; sanitized server-side
        public_key: String,
        /// Algorithm tag
        algorithm: String,
    },
    /// Look up another user's public key
    FetchKey {
        /// Key owner
        user_id: UserId,
    },
    /// Look up the caller's own stored key
    FetchOwnKey,
    /// Store and forward an envelope
    SendMessage {
        /// Intended reader
        recipient: UserId,
        /// Opaque payload
        envelope: WireEnvelope,
    },
    /// Envelopes addressed to the caller
    Inbox {
        /// Page size
        #[serde(default = "default_limit")]
        limit: u32,
        /// Records to skip
        #[serde(default)]
        offset: u32,
    },
    /// Envelopes sent by the caller
    Sent {
        /// Page size
        #[serde(default = "default_limit")]
        limit: u32,
        /// Records to skip
        #[serde(default)]
        offset: u32,
    },
    /// Envelopes exchanged with one peer, both directions
    Conversation {
        /// Other party
        peer: UserId,
        /// Page size
        #[serde(default = "default_limit")]
        limit: u32,
        /// Records to skip
        #[serde(default)]
        offset: u32,
    },
    /// Recipient acknowledges delivery
    MarkDelivered {
        /// Envelope id
        message_id: MessageId,
    },
    /// Recipient acknowledges reading
    MarkRead {
        /// Envelope id
        message_id: MessageId,
    },
    /// Delete every envelope exchanged with a peer
    ClearConversation {
        /// Other party
        peer: UserId,
    },
    /// Keepalive
    Ping,
}

impl Request {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::UploadKey { .. } => "upload_key",
            Self::FetchKey { .. } => "fetch_key",
            Self::FetchOwnKey => "fetch_own_key",
            Self::SendMessage { .. } => "send_message",
            Self::Inbox { .. } => "inbox",
            Self::Sent { .. } => "sent",
            Self::Conversation { .. } => "conversation",
            Self::MarkDelivered { .. } => "mark_delivered",
            Self::MarkRead { .. } => "mark_read",
            Self::ClearConversation { .. } => "clear_conversation",
            Self::Ping => "ping",
        }
    }

    /// True if the request is allowed before `hello`.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Hello { .. } | Self::Ping)
    }
}

/// A stored public key as served by the key directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key owner
    pub user_id: UserId,
    /// Canonical PEM
    pub public_key: String,
    /// Server-computed fingerprint
    pub fingerprint: String,
    /// Algorithm tag
    pub algorithm: String,
    /// First upload
    pub created_at: Timestamp,
    /// Latest upload
    pub updated_at: Timestamp,
}

/// A stored envelope with its routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    /// Relay-assigned id
    pub message_id: MessageId,
    /// Author
    pub sender: UserId,
    /// Intended reader
    pub recipient: UserId,
    /// base64url ciphertext
    pub ciphertext: String,
    /// base64url nonce or fallback marker
    pub nonce: String,
    /// base64url salt or fallback marker
    pub salt: String,
    /// Type tag
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Accepted by the relay
    pub created_at: Timestamp,
    /// Acknowledged by the recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<Timestamp>,
    /// Read by the recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
}

impl EnvelopeRecord {
    /// Opaque envelope fields.
    pub fn wire(&self) -> WireEnvelope {
        WireEnvelope {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce.clone(),
            salt: self.salt.clone(),
            kind: self.kind,
        }
    }

    /// The party other than `me`.
    pub fn counterpart(&self, me: UserId) -> UserId {
        if self.sender == me { self.recipient } else { self.sender }
    }
}

/// Delivery state of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Envelope id
    pub message_id: MessageId,
    /// Delivery acknowledgement time
    pub delivered_at: Option<Timestamp>,
    /// Read acknowledgement time
    pub read_at: Option<Timestamp>,
}

/// Machine-readable error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or oversized request
    BadRequest,
    /// Request needs `hello` first
    Unauthenticated,
    /// Referenced record does not exist
    NotFound,
    /// Caller may not act on this record
    Forbidden,
    /// Uploaded key failed validation
    InvalidKey,
    /// Persistence failed
    StorageError,
    /// Conflicting session state
    Conflict,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error class
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl ErrorPayload {
    /// Build an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Relay response to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    /// Connection bound to a user
    Welcome {
        /// Bound identity
        user_id: UserId,
    },
    /// Key stored
    KeyUploaded {
        /// Server-computed fingerprint
        fingerprint: String,
        /// Algorithm tag
        algorithm: String,
        /// False if an existing key was replaced
        created: bool,
    },
    /// Key lookup hit
    Key(KeyRecord),
    /// Key lookup miss
    KeyNotFound {
        /// Queried identity
        user_id: UserId,
    },
    /// Envelope persisted
    MessageAccepted {
        /// Assigned id
        message_id: MessageId,
        /// Acceptance time
        created_at: Timestamp,
    },
    /// Query result
    Messages {
        /// Envelopes, oldest first
        messages: Vec<EnvelopeRecord>,
        /// Number of envelopes in this page
        count: usize,
    },
    /// Acknowledgement result
    Receipt(Receipt),
    /// Conversation deleted
    ConversationCleared {
        /// Other party
        peer: UserId,
        /// Envelopes removed
        deleted: u64,
    },
    /// Keepalive reply
    Pong,
    /// Request failed
    Error(ErrorPayload),
}

/// Unsolicited relay notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Push {
    /// New envelope for the receiving user
    NewEnvelope(EnvelopeRecord),
    /// The recipient acknowledged one of the receiving user's envelopes
    Receipt(Receipt),
    /// The peer deleted the conversation
    ConversationCleared {
        /// User who cleared it
        peer: UserId,
    },
}

/// Frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Correlates the response
    pub request_id: u64,
    /// Operation
    pub request: Request,
}

/// Frame sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to a client request
    Response {
        /// Echoed request id
        request_id: u64,
        /// Outcome
        response: Response,
    },
    /// Unsolicited notification
    Push(Push),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_clamps_limit() {
        assert_eq!(Page::new(500, 3), Page { limit: MAX_PAGE_SIZE, offset: 3 });
        assert_eq!(Page::new(10, 0).limit, 10);
    }

    #[test]
    fn inbox_defaults_paging() {
        let request: Request = serde_json::from_value(json!({ "op": "inbox" })).unwrap();
        assert_eq!(request, Request::Inbox { limit: DEFAULT_PAGE_SIZE, offset: 0 });
    }

    #[test]
    fn request_shape() {
        let frame = ClientFrame { request_id: 7, request: Request::FetchKey { user_id: 2 } };

        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "request_id": 7, "request": { "op": "fetch_key", "user_id": 2 } })
        );
    }

    #[test]
    fn push_shape_matches_delivery_contract() {
        let record = EnvelopeRecord {
            message_id: 9,
            sender: 1,
            recipient: 2,
            ciphertext: "Y3Q".to_string(),
            nonce: "bm9uY2U".to_string(),
            salt: "c2FsdA".to_string(),
            kind: EnvelopeKind::Text,
            created_at: 1_700_000_000_000,
            delivered_at: None,
            read_at: None,
        };

        let frame = ServerFrame::Push(Push::NewEnvelope(record.clone()));
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(
            value,
            json!({
                "kind": "push",
                "body": {
                    "event": "new_envelope",
                    "message_id": 9,
                    "sender": 1,
                    "recipient": 2,
                    "ciphertext": "Y3Q",
                    "nonce": "bm9uY2U",
                    "salt": "c2FsdA",
                    "type": "text",
                    "created_at": 1_700_000_000_000_u64
                }
            })
        );

        let back: ServerFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn error_codes_are_screaming_snake() {
        let response = Response::Error(ErrorPayload::new(ErrorCode::InvalidKey, "bad key"));

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "result": "error", "code": "INVALID_KEY", "message": "bad key" })
        );
    }

    #[test]
    fn counterpart_is_other_party() {
        let record = EnvelopeRecord {
            message_id: 1,
            sender: 10,
            recipient: 20,
            ciphertext: String::new(),
            nonce: String::new(),
            salt: String::new(),
            kind: EnvelopeKind::Text,
            created_at: 0,
            delivered_at: None,
            read_at: None,
        };

        assert_eq!(record.counterpart(10), 20);
        assert_eq!(record.counterpart(20), 10);
    }
}
