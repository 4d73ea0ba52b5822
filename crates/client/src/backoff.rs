//! Reconnect backoff policy: 500ms doubling per attempt, capped, with a
//! hard attempt limit after which the client stops trying.

use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(8);
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect attempt, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        let delay = BASE_DELAY
            .checked_mul(1 << self.attempt)
            .map(|d| d.min(MAX_DELAY))
            .unwrap_or(MAX_DELAY);
        self.attempt += 1;
        Some(delay)
    }

    /// Called after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base_and_stay_capped() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000]);
    }

    #[test]
    fn exhausted_after_attempt_cap() {
        let mut backoff = Backoff::new();
        for _ in 0..MAX_ATTEMPTS {
            assert!(backoff.next_delay().is_some());
        }
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut backoff = Backoff::new();
        while backoff.next_delay().is_some() {}
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
    }
}
