//! Bounded retry with a fixed pause between attempts.

use std::time::Duration;

/// Counts attempts against a fixed budget.
///
/// `next_wait` returns the pause before the next attempt, or `None` once
/// `max_attempts` have been used.
#[derive(Debug, Clone)]
pub struct FixedRetry {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl FixedRetry {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    /// Record a failed attempt.
    pub fn next_wait(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget() {
        let mut retry = FixedRetry::new(Duration::from_millis(5), 3);
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(5)));
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(5)));
        assert_eq!(retry.next_wait(), None);
        assert_eq!(retry.attempts(), 3);
        assert!(retry.exhausted());
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let mut retry = FixedRetry::new(Duration::ZERO, 0);
        assert!(!retry.exhausted());
        assert_eq!(retry.next_wait(), None);
    }
}
