//! Retry backoff policy.
//!
//! Unique responsibility: compute successive wait durations for retryable failures.
//!
//! The delay starts at `initial` and grows geometrically, capped at
//! `initial * max_factor`. No jitter is applied, so the sequence is
//! non-decreasing.

use std::time::Duration;

/// Growth multiplier applied between consecutive attempts.
const BACKOFF_MULTIPLIER: f64 = 1.6;

/// Default initial delay (5 seconds).
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Default maximum multiplicative factor over the initial delay.
pub const DEFAULT_MAX_BACKOFF_FACTOR: u32 = 10;

/// Backoff policy with an internal attempt counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max_factor: u32,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff policy.
    ///
    /// A `max_factor` of zero is treated as one (the delay never grows).
    #[must_use]
    pub const fn new(initial: Duration, max_factor: u32) -> Self {
        Self {
            initial,
            max_factor: if max_factor == 0 { 1 } else { max_factor },
            attempt: 0,
        }
    }

    /// Upper bound on any delay this policy returns.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.initial.saturating_mul(self.max_factor)
    }

    /// Delay for a zero-based attempt index. Pure: does not touch the counter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * BACKOFF_MULTIPLIER.powi(exponent);
        let cap = self.max_delay();

        if !scaled.is_finite() || scaled >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(scaled).min(cap)
    }

    /// Return the delay for the current attempt and advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Reset the counter to the first attempt.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(5), 10);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn delays_are_non_decreasing_and_bounded() {
        let mut backoff = Backoff::new(Duration::from_millis(250), 10);
        let bound = Duration::from_millis(2_500);

        let mut previous = Duration::ZERO;
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= bound, "{delay:?} > {bound:?}");
            previous = delay;
        }
        assert_eq!(previous, bound);
    }

    #[test]
    fn delay_grows_before_reaching_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), 10);
        assert!(backoff.delay_for_attempt(1) > backoff.delay_for_attempt(0));
        assert!(backoff.delay_for_attempt(3) > backoff.delay_for_attempt(2));
    }

    #[test]
    fn huge_attempt_index_saturates_at_cap() {
        let backoff = Backoff::new(Duration::from_secs(5), 10);
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(50));
    }

    #[test]
    fn zero_factor_never_grows() {
        let mut backoff = Backoff::new(Duration::from_secs(2), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::default();
        let first = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), first);
    }
}
