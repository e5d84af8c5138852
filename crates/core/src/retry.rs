//! Retry bounds and backoff computation.
//!
//! Pure functions and a small policy struct used by the delivery
//! orchestrator. Defaults match the product policy: at most three
//! attempts, exponential backoff from a 60 second floor.

use std::time::Duration;

/// Default maximum number of delivery attempts before dead-lettering.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff floor in seconds (delay before the first retry).
pub const DEFAULT_BACKOFF_FLOOR_SECS: u64 = 60;

/// Default backoff cap in seconds (one hour).
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 3_600;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Deployment retry policy for delivery attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// A record reaching this many attempts without success is dead-lettered.
    pub max_retries: u32,
    /// Minimum delay before any retry.
    pub backoff_floor_secs: u64,
    /// Upper bound on the computed backoff delay.
    pub backoff_cap_secs: u64,
}

impl RetryPolicy {
    /// Backoff delay before the next attempt, keyed by how many attempts
    /// have already been made.
    ///
    /// Exponential: `floor * 2^(attempts - 1)`, capped. Monotonically
    /// non-decreasing in `attempt_count`. An `attempt_count` of zero is
    /// treated as one (a retry is only ever scheduled after an attempt).
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.max(1) - 1;
        // Saturate the shift so absurd attempt counts cannot overflow.
        let multiplier = 1u64.checked_shl(exponent.min(32)).unwrap_or(u64::MAX);
        let secs = self
            .backoff_floor_secs
            .saturating_mul(multiplier)
            .min(self.backoff_cap_secs)
            .max(self.backoff_floor_secs);
        Duration::from_secs(secs)
    }

    /// Whether a record with `attempt_count` failed attempts has exhausted
    /// its retry budget.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_floor_secs: DEFAULT_BACKOFF_FLOOR_SECS,
            backoff_cap_secs: DEFAULT_BACKOFF_CAP_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_waits_the_floor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(240));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..20 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous, "backoff must never decrease");
            assert!(delay <= Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS));
            previous = delay;
        }
    }

    #[test]
    fn zero_attempts_treated_as_one() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), policy.backoff(1));
    }

    #[test]
    fn huge_attempt_count_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(u32::MAX),
            Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS)
        );
    }

    #[test]
    fn exhaustion_at_max_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn zero_floor_stays_zero() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_floor_secs: 0,
            backoff_cap_secs: 10,
        };
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }
}
