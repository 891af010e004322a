//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails operations so tests can check that the relay answers
//! `STORAGE_ERROR` instead of corrupting state, and that clients survive it.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use hushline_proto::{EnvelopeRecord, KeyRecord, MessageId, Page, Timestamp, UserId};

use super::{MarkOutcome, NewEnvelope, Storage, StorageError};

/// Seed used by [`ChaoticStorage::new`].
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Storage wrapper that randomly injects failures.
///
/// A failed operation never reaches the inner storage, so a failure is always
/// "nothing happened". Clones share the RNG and the operation counter.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    state: Arc<Mutex<ChaosState>>,
}

/// LCG state plus the number of operations attempted.
struct ChaosState {
    rng: u64,
    operations: usize,
}

impl ChaosState {
    /// Next value in [0.0, 1.0). Numerical Recipes LCG constants.
    fn next(&mut self) -> f64 {
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.rng = (A.wrapping_mul(self.rng).wrapping_add(C)) % M;
        (self.rng as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, DEFAULT_SEED)
    }

    /// Create with explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            state: Arc::new(Mutex::new(ChaosState { rng: seed, operations: 0 })),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted, failed ones included.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("ChaosState mutex poisoned").operations
    }

    /// Count the operation and decide whether it fails.
    fn roll(&self) -> Result<(), StorageError> {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("ChaosState mutex poisoned");
        state.operations += 1;

        if state.next() < self.failure_rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn append_envelope(&self, envelope: NewEnvelope) -> Result<EnvelopeRecord, StorageError> {
        self.roll()?;
        self.inner.append_envelope(envelope)
    }

    fn load_envelope(&self, message_id: MessageId) -> Result<Option<EnvelopeRecord>, StorageError> {
        self.roll()?;
        self.inner.load_envelope(message_id)
    }

    fn inbox(&self, recipient: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.roll()?;
        self.inner.inbox(recipient, page)
    }

    fn sent(&self, sender: UserId, page: Page) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.roll()?;
        self.inner.sent(sender, page)
    }

    fn conversation(
        &self,
        user: UserId,
        peer: UserId,
        page: Page,
    ) -> Result<Vec<EnvelopeRecord>, StorageError> {
        self.roll()?;
        self.inner.conversation(user, peer, page)
    }

    fn mark_delivered(
        &self,
        message_id: MessageId,
        at: Timestamp,
    ) -> Result<MarkOutcome, StorageError> {
        self.roll()?;
        self.inner.mark_delivered(message_id, at)
    }

    fn mark_read(&self, message_id: MessageId, at: Timestamp) -> Result<MarkOutcome, StorageError> {
        self.roll()?;
        self.inner.mark_read(message_id, at)
    }

    fn clear_conversation(&self, user: UserId, peer: UserId) -> Result<u64, StorageError> {
        self.roll()?;
        self.inner.clear_conversation(user, peer)
    }

    fn store_public_key(&self, record: &KeyRecord) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.store_public_key(record)
    }

    fn load_public_key(&self, user_id: UserId) -> Result<Option<KeyRecord>, StorageError> {
        self.roll()?;
        self.inner.load_public_key(user_id)
    }
}
