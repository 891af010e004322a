//! Storage abstraction for the relay.
//!
//! Trait-based abstraction for persisting envelopes and public keys. The trait
//! is synchronous (no async) to keep the driver a plain state machine.
//!
//! Envelopes are append-only. After creation only `delivered_at` and `read_at`
//! change, each at most once, and envelopes disappear only through
//! [`Storage::clear_conversation`].

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
use hushline_proto::{EnvelopeRecord, KeyRecord, MessageId, Page, Timestamp, UserId, WireEnvelope};
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// An envelope accepted by the relay but not yet assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvelope {
    /// Author
    pub sender: UserId,
    /// Intended reader
    pub recipient: UserId,
    /// Opaque payload
    pub envelope: WireEnvelope,
    /// Acceptance time
    pub created_at: Timestamp,
}

impl NewEnvelope {
    fn into_record(self, message_id: MessageId) -> EnvelopeRecord {
        let WireEnvelope { ciphertext, nonce, salt, kind } = self.envelope;
        EnvelopeRecord {
            message_id,
            sender: self.sender,
            recipient: self.recipient,
            ciphertext,
            nonce,
            salt,
            kind,
            created_at: self.created_at,
            delivered_at: None,
            read_at: None,
        }
    }
}

/// Result of marking an envelope delivered or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The timestamp was set by this call
    Marked(EnvelopeRecord),
    /// The timestamp was already set; nothing changed
    AlreadyMarked(EnvelopeRecord),
}

impl MarkOutcome {
    /// Envelope state after the call.
    pub fn record(&self) -> &EnvelopeRecord {
        match self {
            Self::Marked(record) | Self::AlreadyMarked(record) => record,
        }
    }

    /// True if this call changed the envelope.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Marked(_))
    }
}

/// Storage abstraction for envelopes and public keys.
///
/// Must be Clone (shared between the driver and tooling), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations typically
/// share internal state via Arc, so clones access the same underlying storage.
///
/// # Invariants
///
/// - Message ids are strictly increasing and never reused, including after
///   a conversation is cleared
/// - Queries return envelopes ordered by `(created_at, message_id)` ascending
/// - `delivered_at <= read_at` whenever both are set
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code, but production implementations should handle poisoned
/// mutexes gracefully.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Persist a new envelope and assign its id.
    fn append_envelope(&self, envelope: NewEnvelope) -> Result<EnvelopeRecord, StorageError>;

    /// Load one envelope. `None` if it does not exist.
    fn load_envelope(&self, message_id: MessageId) -> Result<Option<EnvelopeRecord>, StorageError>;

    /// Envelopes addressed to `recipient`.
    fn inbox(&self, recipient: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError>;

    /// Envelopes authored by `sender`.
    fn sent(&self, sender: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError>;

    /// Envelopes exchanged between `user` and `peer`, both directions.
    fn conversation(
        &self,
        user: UserId,
        peer: UserId,
        page: Page,
    ) -> Result<Vec<EnvelopeRecord>, StorageError>;

    /// Set `delivered_at` if unset.
    ///
    /// Idempotent: a second call returns [`MarkOutcome::AlreadyMarked`].
    fn mark_delivered(&self, message_id: MessageId, at: Timestamp)
    -> Result<MarkOutcome, StorageError>;

    /// Set `read_at` if unset, and `delivered_at` too if that is unset.
    ///
    /// Idempotent: a second call returns [`MarkOutcome::AlreadyMarked`].
    fn mark_read(&self, message_id: MessageId, at: Timestamp) -> Result<MarkOutcome, StorageError>;

    /// Delete every envelope between `user` and `peer`. Returns the count.
    fn clear_conversation(&self, user: UserId, peer: UserId) -> Result<u64, StorageError>;

    /// Insert or replace a user's public key record.
    fn store_public_key(&self, record: &KeyRecord) -> Result<(), StorageError>;

    /// Load a user's public key record. `None` if none was uploaded.
    fn load_public_key(&self, user_id: UserId) -> Result<Option<KeyRecord>, StorageError>;
}

/// Sort by `(created_at, message_id)` and cut out one page.
pub(crate) fn paginate(mut records: Vec<EnvelopeRecord>, page: Page) -> Vec<EnvelopeRecord> {
    records.sort_by_key(|r| (r.created_at, r.message_id));
    records.into_iter().skip(page.offset as usize).take(page.limit as usize).collect()
}

/// True if the envelope was exchanged between `a` and `b` in either direction.
pub(crate) fn between(record: &EnvelopeRecord, a: UserId, b: UserId) -> bool {
    (record.sender == a && record.recipient == b) || (record.sender == b && record.recipient == a)
}

/// Apply a delivery acknowledgement. Returns true if anything changed.
pub(crate) fn apply_delivered(record: &mut EnvelopeRecord, at: Timestamp) -> bool {
    if record.delivered_at.is_some() {
        return false;
    }
    record.delivered_at = Some(at);
    true
}

/// Apply a read acknowledgement. Returns true if anything changed.
///
/// Never moves `read_at` before `delivered_at`, even if the clock did.
pub(crate) fn apply_read(record: &mut EnvelopeRecord, at: Timestamp) -> bool {
    if record.read_at.is_some() {
        return false;
    }
    let delivered = *record.delivered_at.get_or_insert(at);
    record.read_at = Some(at.max(delivered));
    true
}
