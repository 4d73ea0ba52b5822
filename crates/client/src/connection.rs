//! Connection state machine owned by the client handle.
//!
//! Mutating UI actions are only allowed while `Connected`; after the
//! reconnect budget is exhausted the state is terminal until the caller
//! explicitly restarts the transport.

use std::time::Duration;

use crate::backoff::Backoff;
use crate::projection::SyncAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting { attempt: u32 },
    GaveUp,
}

pub struct ConnectionTracker {
    state: ConnectionState,
    backoff: Backoff,
}

impl ConnectionTracker {
    /// A fresh tracker has not connected yet and is on its first attempt.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Reconnecting { attempt: 0 },
            backoff: Backoff::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn can_mutate(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The socket came up. Resets the backoff budget and tells the caller
    /// to resync, since broadcasts during the outage were lost.
    pub fn connected(&mut self) -> Vec<SyncAction> {
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        vec![SyncAction::RefetchList]
    }

    /// The socket dropped (or an attempt failed). Returns the delay to
    /// sleep before retrying, or `None` when giving up.
    pub fn dropped(&mut self) -> Option<Duration> {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting {
                    attempt: self.backoff.attempt(),
                };
                Some(delay)
            }
            None => {
                self.state = ConnectionState::GaveUp;
                None
            }
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_emits_resync() {
        let mut tracker = ConnectionTracker::new();
        assert!(!tracker.can_mutate());

        let actions = tracker.connected();
        assert_eq!(actions, vec![SyncAction::RefetchList]);
        assert!(tracker.can_mutate());
    }

    #[test]
    fn gives_up_after_budget_and_stays_down() {
        let mut tracker = ConnectionTracker::new();
        let mut drops = 0;
        while tracker.dropped().is_some() {
            drops += 1;
            assert!(matches!(
                tracker.state(),
                ConnectionState::Reconnecting { .. }
            ));
        }
        assert_eq!(drops, crate::backoff::MAX_ATTEMPTS);
        assert_eq!(tracker.state(), ConnectionState::GaveUp);
        assert!(!tracker.can_mutate());
    }

    #[test]
    fn successful_connect_restores_the_budget() {
        let mut tracker = ConnectionTracker::new();
        tracker.dropped();
        tracker.dropped();
        tracker.connected();

        assert_eq!(tracker.dropped(), Some(Duration::from_millis(500)));
    }
}
