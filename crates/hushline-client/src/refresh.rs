//! Conversation refresh debouncing.
//!
//! At most one fetch per conversation is in flight, consecutive fetches are
//! spaced by a minimum interval, and a result arriving for a conversation the
//! user has left is discarded.

use std::{collections::HashMap, time::Duration};

use hushline_proto::UserId;

/// Default spacing between fetches of one conversation.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Issue the fetch
    Start,
    /// A fetch for this conversation is already in flight
    InFlight,
    /// The previous fetch started less than the minimum interval ago
    TooSoon,
}

#[derive(Debug, Clone, Copy)]
struct GateState<I> {
    in_flight: bool,
    last_started: I,
}

/// Refresh gate generic over the environment's instant type.
#[derive(Debug)]
pub struct RefreshGate<I> {
    min_interval: Duration,
    active: Option<UserId>,
    peers: HashMap<UserId, GateState<I>>,
}

impl<I> RefreshGate<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Gate with the given minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, active: None, peers: HashMap::new() }
    }

    /// Conversation currently on screen.
    pub fn active(&self) -> Option<UserId> {
        self.active
    }

    /// Switch the active conversation.
    pub fn set_active(&mut self, peer: Option<UserId>) {
        self.active = peer;
    }

    /// Ask to refresh `peer`'s conversation at `now`.
    pub fn try_begin(&mut self, peer: UserId, now: I) -> RefreshDecision {
        if let Some(state) = self.peers.get(&peer) {
            if state.in_flight {
                return RefreshDecision::InFlight;
            }
            if now - state.last_started < self.min_interval {
                return RefreshDecision::TooSoon;
            }
        }

        self.peers.insert(peer, GateState { in_flight: true, last_started: now });
        RefreshDecision::Start
    }

    /// A fetch for `peer` finished. Returns false if the result must be
    /// discarded because the user switched away.
    pub fn complete(&mut self, peer: UserId) -> bool {
        if let Some(state) = self.peers.get_mut(&peer) {
            state.in_flight = false;
        }
        self.active == Some(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn concurrent_refreshes_collapse() {
        let mut gate = RefreshGate::new(DEFAULT_REFRESH_INTERVAL);
        gate.set_active(Some(2));

        assert_eq!(gate.try_begin(2, ms(0)), RefreshDecision::Start);
        assert_eq!(gate.try_begin(2, ms(10)), RefreshDecision::InFlight);
        assert_eq!(gate.try_begin(2, ms(900)), RefreshDecision::InFlight);

        // Other conversations are independent
        assert_eq!(gate.try_begin(3, ms(10)), RefreshDecision::Start);
    }

    #[test]
    fn minimum_interval_between_fetches() {
        let mut gate = RefreshGate::new(DEFAULT_REFRESH_INTERVAL);
        gate.set_active(Some(2));

        gate.try_begin(2, ms(0));
        assert!(gate.complete(2));

        assert_eq!(gate.try_begin(2, ms(499)), RefreshDecision::TooSoon);
        assert_eq!(gate.try_begin(2, ms(500)), RefreshDecision::Start);
    }

    #[test]
    fn superseded_result_discarded() {
        let mut gate = RefreshGate::new(DEFAULT_REFRESH_INTERVAL);
        gate.set_active(Some(2));
        gate.try_begin(2, ms(0));

        gate.set_active(Some(3));
        assert!(!gate.complete(2));

        // The gate is released even though the result was dropped
        assert_eq!(gate.try_begin(2, ms(600)), RefreshDecision::Start);
    }
}
