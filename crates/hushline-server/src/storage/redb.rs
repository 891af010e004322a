//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! All state survives relay restarts, including the message id counter.

use std::{path::Path, sync::Arc};

use hushline_proto::{EnvelopeRecord, KeyRecord, MessageId, Page, Timestamp, UserId};
use redb::{Database, ReadableTable, TableDefinition};

use super::{
    MarkOutcome, NewEnvelope, Storage, StorageError, apply_delivered, apply_read, paginate,
};

/// Table: envelopes
/// Key: message_id
/// Value: CBOR-encoded EnvelopeRecord
const ENVELOPES: TableDefinition<u64, &[u8]> = TableDefinition::new("envelopes");

/// Table: participants
/// Key: (user, peer, message_id) as big-endian bytes [24 bytes]
/// Value: none
///
/// Every envelope is indexed twice, once from each party's side, so both
/// "all envelopes involving user" and "all envelopes between user and peer"
/// are prefix range scans.
const PARTICIPANTS: TableDefinition<&[u8], ()> = TableDefinition::new("participants");

/// Table: public_keys
/// Key: user_id
/// Value: CBOR-encoded KeyRecord
const PUBLIC_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("public_keys");

/// Table: meta
/// Key: counter name
/// Value: counter value
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Next message id to assign. Only ever increases.
const NEXT_MESSAGE_ID: &str = "next_message_id";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (ENVELOPES, PARTICIPANTS,
    /// PUBLIC_KEYS, META).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(PARTICIPANTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(PUBLIC_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(META).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Ids of envelopes involving `user`, optionally only those with `peer`.
    fn participant_ids<T: ReadableTable<&'static [u8], ()>>(
        table: &T,
        user: UserId,
        peer: Option<UserId>,
    ) -> Result<Vec<MessageId>, StorageError> {
        let (start_key, end_key) = match peer {
            Some(peer) => {
                (encode_participant_key(user, peer, 0), encode_participant_key(user, peer, u64::MAX))
            },
            None => (encode_participant_key(user, 0, 0), encode_participant_key(user, u64::MAX, u64::MAX)),
        };

        let results = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut ids = Vec::new();
        for result in results {
            let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let (_, _, message_id) = decode_participant_key(key.value()).ok_or_else(|| {
                StorageError::Serialization("malformed participant key".to_string())
            })?;
            ids.push(message_id);
        }

        Ok(ids)
    }

    /// Load the records for `ids` that satisfy `keep`.
    fn load_records<T: ReadableTable<u64, &'static [u8]>>(
        table: &T,
        ids: &[MessageId],
        keep: impl Fn(&EnvelopeRecord) -> bool,
    ) -> Result<Vec<EnvelopeRecord>, StorageError> {
        let mut records = Vec::with_capacity(ids.len());
        for &message_id in ids {
            let Some(value) = table.get(message_id).map_err(|e| StorageError::Io(e.to_string()))?
            else {
                return Err(StorageError::Serialization(format!(
                    "participant index references missing envelope {message_id}"
                )));
            };

            let record = decode_envelope(value.value())?;
            if keep(&record) {
                records.push(record);
            }
        }

        Ok(records)
    }

    fn query(
        &self,
        user: UserId,
        peer: Option<UserId>,
        page: Page,
        keep: impl Fn(&EnvelopeRecord) -> bool,
    ) -> Result<Vec<EnvelopeRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let participants =
            txn.open_table(PARTICIPANTS).map_err(|e| StorageError::Io(e.to_string()))?;
        let envelopes = txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;

        let ids = Self::participant_ids(&participants, user, peer)?;
        let records = Self::load_records(&envelopes, &ids, keep)?;

        Ok(paginate(records, page))
    }

    fn mark(
        &self,
        message_id: MessageId,
        apply: impl FnOnce(&mut EnvelopeRecord) -> bool,
    ) -> Result<MarkOutcome, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let outcome = {
            let mut table =
                txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut record = match table
                .get(message_id)
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => decode_envelope(value.value())?,
                None => return Err(StorageError::EnvelopeNotFound { message_id }),
            };

            if apply(&mut record) {
                let bytes = encode_cbor(&record)?;
                table
                    .insert(message_id, bytes.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                MarkOutcome::Marked(record)
            } else {
                MarkOutcome::AlreadyMarked(record)
            }
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(outcome)
    }
}

impl Storage for RedbStorage {
    fn append_envelope(&self, envelope: NewEnvelope) -> Result<EnvelopeRecord, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let record = {
            let mut meta = txn.open_table(META).map_err(|e| StorageError::Io(e.to_string()))?;
            let message_id = meta
                .get(NEXT_MESSAGE_ID)
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map_or(1, |value| value.value());
            meta.insert(NEXT_MESSAGE_ID, message_id + 1)
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let record = envelope.into_record(message_id);
            let bytes = encode_cbor(&record)?;

            let mut envelopes =
                txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;
            envelopes
                .insert(message_id, bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            let mut participants =
                txn.open_table(PARTICIPANTS).map_err(|e| StorageError::Io(e.to_string()))?;
            for key in [
                encode_participant_key(record.sender, record.recipient, message_id),
                encode_participant_key(record.recipient, record.sender, message_id),
            ] {
                participants
                    .insert(key.as_slice(), ())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }

            record
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(record)
    }

    fn load_envelope(&self, message_id: MessageId) -> Result<Option<EnvelopeRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(message_id).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => Ok(Some(decode_envelope(value.value())?)),
            None => Ok(None),
        }
    }

    fn inbox(&self, recipient: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.query(recipient, None, page, |r| r.recipient == recipient)
    }

    fn sent(&self, sender: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.query(sender, None, page, |r| r.sender == sender)
    }

    fn conversation(
        &self,
        user: UserId,
        peer: UserId,
        page: Page,
    ) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.query(user, Some(peer), page, |_| true)
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

    fn clear_conversation(&self, user: UserId, peer: UserId) -> Result<u64, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let deleted = {
            let mut participants =
                txn.open_table(PARTICIPANTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let ids = Self::participant_ids(&participants, user, Some(peer))?;

            let mut envelopes =
                txn.open_table(ENVELOPES).map_err(|e| StorageError::Io(e.to_string()))?;

            for &message_id in &ids {
                for key in [
                    encode_participant_key(user, peer, message_id),
                    encode_participant_key(peer, user, message_id),
                ] {
                    participants
                        .remove(key.as_slice())
                        .map_err(|e| StorageError::Io(e.to_string()))?;
                }
                envelopes.remove(message_id).map_err(|e| StorageError::Io(e.to_string()))?;
            }

            ids.len() as u64
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(deleted)
    }

    fn store_public_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table =
                txn.open_table(PUBLIC_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

            let bytes = encode_cbor(record)?;
            table
                .insert(record.user_id, bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn load_public_key(&self, user_id: UserId) -> Result<Option<KeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PUBLIC_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(user_id).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let record: KeyRecord = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode_envelope(bytes: &[u8]) -> Result<EnvelopeRecord, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Encode (user, peer, message_id) as 24-byte big-endian key.
///
/// Layout: [user: 8 bytes BE][peer: 8 bytes BE][message_id: 8 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering.
fn encode_participant_key(user: UserId, peer: UserId, message_id: MessageId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&user.to_be_bytes());
    key[8..16].copy_from_slice(&peer.to_be_bytes());
    key[16..].copy_from_slice(&message_id.to_be_bytes());
    key
}

/// Decode participant key back to (user, peer, message_id).
fn decode_participant_key(key: &[u8]) -> Option<(UserId, UserId, MessageId)> {
    let user = u64::from_be_bytes(key.get(..8)?.try_into().ok()?);
    let peer = u64::from_be_bytes(key.get(8..16)?.try_into().ok()?);
    let message_id = u64::from_be_bytes(key.get(16..24)?.try_into().ok()?);
    Some((user, peer, message_id))
}

#[cfg(test)]
mod tests {
    use hushline_proto::{EnvelopeKind, WireEnvelope};
    use tempfile::tempdir;

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

    #[test]
    fn test_participant_key_encoding() {
        let key = encode_participant_key(0x0102_0304_0506_0708, 42, u64::MAX);
        assert_eq!(key.len(), 24);

        let decoded = decode_participant_key(&key).unwrap();
        assert_eq!(decoded, (0x0102_0304_0506_0708, 42, u64::MAX));
        assert_eq!(decode_participant_key(&key[..23]), None);
    }

    #[test]
    fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        let record = storage.append_envelope(envelope(1, 2, 100)).unwrap();
        assert_eq!(record.message_id, 1);

        let loaded = storage.load_envelope(record.message_id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(storage.load_envelope(99).unwrap(), None);
    }

    #[test]
    fn test_queries_by_direction() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.append_envelope(envelope(1, 2, 100)).unwrap();
        storage.append_envelope(envelope(2, 1, 101)).unwrap();
        storage.append_envelope(envelope(3, 2, 102)).unwrap();

        let inbox: Vec<_> =
            storage.inbox(2, Page::default()).unwrap().iter().map(|r| r.sender).collect();
        assert_eq!(inbox, vec![1, 3]);

        let sent = storage.sent(2, Page::default()).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, 1);

        let conversation = storage.conversation(1, 2, Page::default()).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(storage.conversation(2, 1, Page::default()).unwrap(), conversation);
    }

    #[test]
    fn test_mark_delivered_then_read() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();
        let record = storage.append_envelope(envelope(1, 2, 100)).unwrap();

        assert!(storage.mark_delivered(record.message_id, 150).unwrap().changed());
        assert!(!storage.mark_delivered(record.message_id, 160).unwrap().changed());
        assert!(storage.mark_read(record.message_id, 200).unwrap().changed());

        let loaded = storage.load_envelope(record.message_id).unwrap().unwrap();
        assert_eq!(loaded.delivered_at, Some(150));
        assert_eq!(loaded.read_at, Some(200));
    }

    #[test]
    fn test_clear_conversation_removes_index() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.append_envelope(envelope(1, 2, 100)).unwrap();
        storage.append_envelope(envelope(2, 1, 101)).unwrap();
        storage.append_envelope(envelope(1, 3, 102)).unwrap();

        assert_eq!(storage.clear_conversation(1, 2).unwrap(), 2);
        assert!(storage.conversation(2, 1, Page::default()).unwrap().is_empty());
        assert!(storage.inbox(2, Page::default()).unwrap().is_empty());
        assert_eq!(storage.sent(1, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");

        let (first, key) = {
            let storage = RedbStorage::open(&path).unwrap();
            let first = storage.append_envelope(envelope(1, 2, 100)).unwrap();
            let key = KeyRecord {
                user_id: 1,
                public_key: "pem".to_string(),
                fingerprint: "ab".repeat(32),
                algorithm: "X25519".to_string(),
                created_at: 5,
                updated_at: 5,
            };
            storage.store_public_key(&key).unwrap();
            storage.clear_conversation(1, 2).unwrap();
            (first, key)
        };

        let storage = RedbStorage::open(&path).unwrap();
        assert_eq!(storage.load_public_key(1).unwrap(), Some(key));

        // Counter is persisted, so ids are not reused after restart
        let second = storage.append_envelope(envelope(1, 2, 200)).unwrap();
        assert!(second.message_id > first.message_id);
    }
}
