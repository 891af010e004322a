//! Rendered conversation views.
//!
//! Envelopes are keyed by message id, so the same envelope arriving through a
//! push and through a refresh renders once.

use std::collections::BTreeMap;

use hushline_proto::{EnvelopeRecord, MessageId, Receipt, Timestamp, UserId};

/// Rendered content of one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Decrypted text
    Plaintext(String),
    /// Sent in fallback mode; was never encrypted
    Unencrypted(String),
    /// Authentication or structure check failed
    Undecipherable,
    /// The counterpart's key is not cached yet
    KeyMissing,
}

impl MessageBody {
    /// Text to show, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Plaintext(text) | Self::Unencrypted(text) => Some(text),
            Self::Undecipherable | Self::KeyMissing => None,
        }
    }
}

/// One message as the application displays it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Relay-assigned id
    pub message_id: MessageId,
    /// Author
    pub sender: UserId,
    /// Reader
    pub recipient: UserId,
    /// Rendered content
    pub body: MessageBody,
    /// Accepted by the relay
    pub created_at: Timestamp,
    /// Delivery acknowledgement
    pub delivered_at: Option<Timestamp>,
    /// Read acknowledgement
    pub read_at: Option<Timestamp>,
}

impl RenderedMessage {
    /// Pair a stored envelope with its rendered body.
    pub fn from_record(record: &EnvelopeRecord, body: MessageBody) -> Self {
        Self {
            message_id: record.message_id,
            sender: record.sender,
            recipient: record.recipient,
            body,
            created_at: record.created_at,
            delivered_at: record.delivered_at,
            read_at: record.read_at,
        }
    }
}

/// Messages exchanged with one peer, ordered by id.
#[derive(Debug, Clone)]
pub struct Conversation {
    peer: UserId,
    messages: BTreeMap<MessageId, RenderedMessage>,
}

impl Conversation {
    /// Empty conversation with `peer`.
    pub fn new(peer: UserId) -> Self {
        Self { peer, messages: BTreeMap::new() }
    }

    /// The other party.
    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Insert a message. Returns false if the id is already present.
    ///
    /// A duplicate keeps its rendered body but takes the newer receipt
    /// timestamps, which only ever move from unset to set.
    pub fn insert(&mut self, message: RenderedMessage) -> bool {
        match self.messages.get_mut(&message.message_id) {
            Some(existing) => {
                existing.delivered_at = existing.delivered_at.or(message.delivered_at);
                existing.read_at = existing.read_at.or(message.read_at);
                false
            },
            None => {
                self.messages.insert(message.message_id, message);
                true
            },
        }
    }

    /// Replace the body of a message that was rendered without a key.
    pub fn rerender(&mut self, message_id: MessageId, body: MessageBody) -> bool {
        match self.messages.get_mut(&message_id) {
            Some(existing) if existing.body == MessageBody::KeyMissing => {
                existing.body = body;
                true
            },
            _ => false,
        }
    }

    /// Apply a delivery receipt. Returns the updated message.
    pub fn apply_receipt(&mut self, receipt: Receipt) -> Option<&RenderedMessage> {
        let message = self.messages.get_mut(&receipt.message_id)?;
        message.delivered_at = message.delivered_at.or(receipt.delivered_at);
        message.read_at = message.read_at.or(receipt.read_at);
        Some(message)
    }

    /// Message by id.
    pub fn get(&self, message_id: MessageId) -> Option<&RenderedMessage> {
        self.messages.get(&message_id)
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &RenderedMessage> {
        self.messages.values()
    }

    /// Ids of messages still waiting for the peer's key.
    pub fn key_missing(&self) -> Vec<MessageId> {
        self.messages
            .values()
            .filter(|m| m.body == MessageBody::KeyMissing)
            .map(|m| m.message_id)
            .collect()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if there are no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every message. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.messages.len();
        self.messages.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: MessageId, body: MessageBody) -> RenderedMessage {
        RenderedMessage {
            message_id: id,
            sender: 2,
            recipient: 1,
            body,
            created_at: 1_000 + id,
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn duplicate_id_renders_once() {
        let mut conversation = Conversation::new(2);
        assert!(conversation.insert(message(1, MessageBody::Plaintext("hi".to_string()))));

        let mut again = message(1, MessageBody::Undecipherable);
        again.delivered_at = Some(5);
        assert!(!conversation.insert(again));

        assert_eq!(conversation.len(), 1);
        let stored = conversation.get(1).unwrap();
        assert_eq!(stored.body, MessageBody::Plaintext("hi".to_string()));
        assert_eq!(stored.delivered_at, Some(5));
    }

    #[test]
    fn ordered_by_id() {
        let mut conversation = Conversation::new(2);
        for id in [5, 1, 3] {
            conversation.insert(message(id, MessageBody::KeyMissing));
        }

        let ids: Vec<_> = conversation.messages().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn rerender_only_replaces_key_missing() {
        let mut conversation = Conversation::new(2);
        conversation.insert(message(1, MessageBody::KeyMissing));
        conversation.insert(message(2, MessageBody::Undecipherable));

        assert_eq!(conversation.key_missing(), vec![1]);
        assert!(conversation.rerender(1, MessageBody::Plaintext("late".to_string())));
        assert!(!conversation.rerender(2, MessageBody::Plaintext("no".to_string())));
        assert!(conversation.key_missing().is_empty());
    }

    #[test]
    fn receipts_never_unset() {
        let mut conversation = Conversation::new(2);
        conversation.insert(message(1, MessageBody::KeyMissing));

        conversation.apply_receipt(Receipt { message_id: 1, delivered_at: Some(10), read_at: None });
        let updated = conversation
            .apply_receipt(Receipt { message_id: 1, delivered_at: None, read_at: Some(20) })
            .unwrap();

        assert_eq!((updated.delivered_at, updated.read_at), (Some(10), Some(20)));
        let unknown = Receipt { message_id: 9, delivered_at: None, read_at: None };
        assert!(conversation.apply_receipt(unknown).is_none());
    }

    #[test]
    fn clear_empties() {
        let mut conversation = Conversation::new(2);
        conversation.insert(message(1, MessageBody::KeyMissing));
        conversation.insert(message(2, MessageBody::KeyMissing));

        assert_eq!(conversation.clear(), 2);
        assert!(conversation.is_empty());
    }
}
