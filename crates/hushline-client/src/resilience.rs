//! Per-peer key acquisition tracking and the fallback policy.
//!
//! ```text
//! Unknown ──► KeyFetchPending ──► KeyAvailable
//!                   │    ▲
//!                   ▼    │
//!              KeyUnavailable (failures += 1)
//! ```
//!
//! After `failure_threshold` consecutive failures automatic fetching stops and
//! fallback is *offered*. Fallback is only entered through
//! [`ResilienceLayer::confirm_fallback`], which is logged on the
//! `hushline::fallback` target. Observing a valid key resets everything.

use std::collections::HashMap;

use hushline_proto::UserId;

use crate::error::ClientError;

/// Key acquisition state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyState {
    /// Never fetched
    #[default]
    Unknown,
    /// Fetch in flight
    KeyFetchPending,
    /// Valid key cached
    KeyAvailable,
    /// Last fetch missed or returned an unusable key
    KeyUnavailable,
}

/// When to offer the unencrypted fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Consecutive key failures before fallback is offered and automatic
    /// fetching stops
    pub failure_threshold: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self { failure_threshold: 3 }
    }
}

/// Outcome of asking to fetch a peer's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Send a fetch request
    Fetch,
    /// A fetch is already in flight; wait for it
    AlreadyPending,
    /// Threshold reached; only a forced retry fetches again
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    state: KeyState,
    failures: u32,
    offered: bool,
    fallback: bool,
}

/// Tracks key acquisition for every peer.
#[derive(Debug, Default)]
pub struct ResilienceLayer {
    policy: FallbackPolicy,
    peers: HashMap<UserId, PeerState>,
}

impl ResilienceLayer {
    /// Create a layer with `policy`.
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy, peers: HashMap::new() }
    }

    /// Active policy.
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Current state for `peer`.
    pub fn state(&self, peer: UserId) -> KeyState {
        self.peers.get(&peer).map_or(KeyState::Unknown, |p| p.state)
    }

    /// Consecutive failures for `peer`.
    pub fn failures(&self, peer: UserId) -> u32 {
        self.peers.get(&peer).map_or(0, |p| p.failures)
    }

    /// True if the user confirmed fallback for `peer`.
    pub fn is_fallback(&self, peer: UserId) -> bool {
        self.peers.get(&peer).is_some_and(|p| p.fallback)
    }

    /// Decide whether to fetch `peer`'s key. `forced` bypasses the threshold.
    pub fn begin_fetch(&mut self, peer: UserId, forced: bool) -> FetchDecision {
        let threshold = self.policy.failure_threshold;
        let entry = self.peers.entry(peer).or_default();

        if entry.state == KeyState::KeyFetchPending {
            return FetchDecision::AlreadyPending;
        }
        if !forced && entry.failures >= threshold {
            return FetchDecision::Suppressed;
        }

        entry.state = KeyState::KeyFetchPending;
        FetchDecision::Fetch
    }

    /// A valid key was observed. Returns true if fallback was active and has
    /// now ended.
    pub fn key_available(&mut self, peer: UserId) -> bool {
        let entry = self.peers.entry(peer).or_default();
        let was_fallback = entry.fallback;
        *entry = PeerState { state: KeyState::KeyAvailable, ..PeerState::default() };

        if was_fallback {
            tracing::info!(target: "hushline::fallback", peer, "valid key observed, fallback ended");
        }
        was_fallback
    }

    /// A fetch missed or produced an unusable key.
    ///
    /// Returns true exactly once per streak: when the failure count first
    /// reaches the threshold and fallback should be offered.
    pub fn key_unavailable(&mut self, peer: UserId) -> bool {
        let threshold = self.policy.failure_threshold;
        let entry = self.peers.entry(peer).or_default();

        entry.state = KeyState::KeyUnavailable;
        entry.failures = entry.failures.saturating_add(1);

        if entry.failures >= threshold && !entry.offered {
            entry.offered = true;
            return true;
        }
        false
    }

    /// Enter fallback for `peer` after the user accepted the offer.
    ///
    /// # Errors
    ///
    /// - `FallbackNotOffered` if the threshold has not been reached
    pub fn confirm_fallback(&mut self, peer: UserId) -> Result<(), ClientError> {
        let entry = self
            .peers
            .get_mut(&peer)
            .filter(|p| p.offered)
            .ok_or(ClientError::FallbackNotOffered { peer })?;

        if !entry.fallback {
            entry.fallback = true;
            tracing::warn!(
                target: "hushline::fallback",
                peer,
                failures = entry.failures,
                "user confirmed unencrypted fallback"
            );
        }
        Ok(())
    }

    /// Leave fallback for `peer`. Returns true if it was active.
    pub fn disable_fallback(&mut self, peer: UserId) -> bool {
        match self.peers.get_mut(&peer) {
            Some(entry) if entry.fallback => {
                entry.fallback = false;
                tracing::info!(target: "hushline::fallback", peer, "fallback disabled by user");
                true
            },
            _ => false,
        }
    }
}
