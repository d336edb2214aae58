//! Bounded exponential backoff with jitter.
//!
//! Shared by the watcher loop's event appends and the replication task.
//! Delays double from `initial_delay` up to `max_delay`, each with ±25% jitter.

use std::time::Duration;

use rand::Rng;

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// Default number of attempts for a single operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How often and how patiently to retry a failing operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Millisecond delays so tests never sleep for long.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }

    /// Delay to wait after the given failed attempt, with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        add_jitter(self.base_delay(attempt))
    }
}

/// Adds ±25% jitter to a duration.
fn add_jitter(duration: Duration) -> Duration {
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return duration;
    }
    let jitter_range = secs * JITTER_FACTOR;
    let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((secs + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(7), Duration::from_secs(60));
        assert_eq!(policy.base_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(60));

        for _ in 0..100 {
            let secs = policy.delay_for(1).as_secs_f64();
            assert!((7.5..=12.5).contains(&secs), "Jitter out of bounds: {}", secs);
        }
    }

    #[test]
    fn test_zero_delay_has_no_jitter() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
