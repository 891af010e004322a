#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use hushline_proto::{EnvelopeRecord, KeyRecord, MessageId, Page, Timestamp, UserId};

use super::{
    MarkOutcome, NewEnvelope, Storage, StorageError, apply_delivered, apply_read, between,
    paginate,
};

/// In-memory storage implementation for testing and the default runtime
///
/// Envelopes live in a `BTreeMap` keyed by id, public keys in a `HashMap`. All
/// state is wrapped in Arc<Mutex<>> to allow Clone and concurrent access.
/// Thread-safe through Mutex, but uses `lock().expect()` which will panic if
/// the mutex is poisoned. Queries scan every envelope, which is fine for the
/// sizes this backend is meant for.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

struct MemoryStorageInner {
    /// Envelopes by id
    envelopes: BTreeMap<MessageId, EnvelopeRecord>,

    /// Next id to assign. Never decreases.
    next_message_id: MessageId,

    /// Current public key per user
    public_keys: HashMap<UserId, KeyRecord>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner {
                envelopes: BTreeMap::new(),
                next_message_id: 1,
                public_keys: HashMap::new(),
            })),
        }
    }

    /// Number of stored envelopes.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn envelope_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").envelopes.len()
    }

    #[allow(clippy::expect_used)]
    fn query(
        &self,
        page: Page,
        filter: impl Fn(&EnvelopeRecord) -> bool,
    ) -> Vec<EnvelopeRecord> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        let matching = inner.envelopes.values().filter(|&r| filter(r)).cloned().collect();
        paginate(matching, page)
    }

    #[allow(clippy::expect_used)]
    fn mark(
        &self,
        message_id: MessageId,
        apply: impl FnOnce(&mut EnvelopeRecord) -> bool,
    ) -> Result<MarkOutcome, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let record = inner
            .envelopes
            .get_mut(&message_id)
            .ok_or(StorageError::EnvelopeNotFound { message_id })?;

        if apply(&mut *record) {
            Ok(MarkOutcome::Marked(record.clone()))
        } else {
            Ok(MarkOutcome::AlreadyMarked(record.clone()))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn append_envelope(&self, envelope: NewEnvelope) -> Result<EnvelopeRecord, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let message_id = inner.next_message_id;
        inner.next_message_id += 1;

        let record = envelope.into_record(message_id);
        debug_assert!(!inner.envelopes.contains_key(&message_id));
        inner.envelopes.insert(message_id, record.clone());

        Ok(record)
    }

    #[allow(clippy::expect_used)]
    fn load_envelope(&self, message_id: MessageId) -> Result<Option<EnvelopeRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.envelopes.get(&message_id).cloned())
    }

    fn inbox(&self, recipient: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        Ok(self.query(page, |r| r.recipient == recipient))
    }

    fn sent(&self, sender: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        Ok(self.query(page, |r| r.sender == sender))
    }

    fn conversation(
        &self,
        user: UserId,
        peer: UserId,
        page: Page,
    ) -> Result<Vec<EnvelopeRecord>, StorageError> {
        Ok(self.query(page, |r| between(r, user, peer)))
    }

    fn mark_delivered(
        &self,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<MarkOutcome, StorageError> {
        self.mark(message_id, |r| apply_delivered(r, at))
    }

    fn mark_read(&self, message_id: MessageId, at: Timestamp) -> Result<MarkOutcome, StorageError> {
        self.mark(message_id, |r| apply_read(r, at))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn clear_conversation(&self, user: UserId, peer: UserId) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let before = inner.envelopes.len();
        inner.envelopes.retain(|_, r| !between(r, user, peer));

        Ok((before - inner.envelopes.len()) as u64)
    }

    #[allow(clippy::expect_used)]
    fn store_public_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .public_keys
            .insert(record.user_id, record.clone());

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn load_public_key(&self, user_id: UserId) -> Result<Option<KeyRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.public_keys.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use hushline_proto::{EnvelopeKind, WireEnvelope};

    use super::*;

    fn envelope(sender: UserId, recipient: UserId, created_at: Timestamp) -> NewEnvelope {
        NewEnvelope {
            sender,
            recipient,
            envelope: WireEnvelope {
                ciphertext: "Y2lwaGVy".to_string(),
                nonce: "bm9uY2Vub25jZQ".to_string(),
                salt: "c2FsdHNhbHRzYWx0c2FsdA".to_string(),
                kind: EnvelopeKind::Text,
            },
            created_at,
        }
    }

    fn key_record(user_id: UserId, fingerprint: &str, at: Timestamp) -> KeyRecord {
        KeyRecord {
            user_id,
            public_key: "pem".to_string(),
            fingerprint: fingerprint.to_string(),
            algorithm: "X25519".to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_new_storage_is_empty() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.envelope_count(), 0);
        assert!(storage.inbox(1, Page::default()).unwrap().is_empty());
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let storage = MemoryStorage::new();

        let a = storage.append_envelope(envelope(1, 2, 100)).unwrap();
        let b = storage.append_envelope(envelope(2, 1, 101)).unwrap();

        assert!(b.message_id > a.message_id);
        assert_eq!(a.delivered_at, None);
        assert_eq!(a.read_at, None);
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let storage = MemoryStorage::new();

        let first = storage.append_envelope(envelope(1, 2, 100)).unwrap();
        assert_eq!(storage.clear_conversation(1, 2).unwrap(), 1);
        let second = storage.append_envelope(envelope(1, 2, 200)).unwrap();

        assert!(second.message_id > first.message_id);
    }

    #[test]
    fn test_inbox_and_sent_are_directional() {
        let storage = MemoryStorage::new();
        storage.append_envelope(envelope(1, 2, 100)).unwrap();
        storage.append_envelope(envelope(2, 1, 101)).unwrap();
        storage.append_envelope(envelope(3, 2, 102)).unwrap();

        assert_eq!(storage.inbox(2, Page::default()).unwrap().len(), 2);
        assert_eq!(storage.sent(2, Page::default()).unwrap().len(), 1);
        assert_eq!(storage.conversation(1, 2, Page::default()).unwrap().len(), 2);
        assert_eq!(storage.conversation(2, 3, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_mark_read_twice_keeps_first_timestamp() {
        let storage = MemoryStorage::new();
        let record = storage.append_envelope(envelope(1, 2, 100)).unwrap();

        let first = storage.mark_read(record.message_id, 200).unwrap();
        let second = storage.mark_read(record.message_id, 300).unwrap();

        assert!(first.changed());
        assert!(!second.changed());
        assert_eq!(second.record().read_at, Some(200));
        assert_eq!(second.record().delivered_at, Some(200));
    }

    #[test]
    fn test_mark_unknown_envelope() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage.mark_delivered(42, 1),
            Err(StorageError::EnvelopeNotFound { message_id: 42 })
        );
    }

    #[test]
    fn test_clear_only_touches_one_conversation() {
        let storage = MemoryStorage::new();
        storage.append_envelope(envelope(1, 2, 100)).unwrap();
        storage.append_envelope(envelope(2, 1, 101)).unwrap();
        storage.append_envelope(envelope(1, 3, 102)).unwrap();

        assert_eq!(storage.clear_conversation(2, 1).unwrap(), 2);
        assert_eq!(storage.envelope_count(), 1);
        assert_eq!(storage.sent(1, Page::default()).unwrap()[0].recipient, 3);
    }

    #[test]
    fn test_public_key_last_write_wins() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load_public_key(7).unwrap(), None);

        storage.store_public_key(&key_record(7, "aa", 1)).unwrap();
        storage.store_public_key(&key_record(7, "bb", 2)).unwrap();

        assert_eq!(storage.load_public_key(7).unwrap().unwrap().fingerprint, "bb");
    }
}
