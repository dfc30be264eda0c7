//! Bounded exponential backoff for the dead-letter retry pipeline.
//!
//! The default policy is the pipeline's contract: retry budget 3, delays
//! `2^retry_count` seconds - 1s, 2s, 4s for counts 0, 1, 2. The issuance
//! worker's retryable path deliberately does NOT use this module: its
//! redelivery is immediate, driven by the uncommitted channel offset.

use std::time::Duration;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of retry attempts before terminal failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Cap on the computed delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    /// The dead-letter schedule: 3 retries at 1s, 2s, 4s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry following `attempt` prior failures.
    ///
    /// `delay = initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_precision_loss, clippy::cast_sign_loss)] // Delays are small positive values
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Whether a retry count has spent the budget.
    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_1s_2s_4s() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            multiplier: 10.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(5));
    }

    #[test]
    fn budget_boundary() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    proptest::proptest! {
        #[test]
        fn delays_never_exceed_the_cap_and_never_shrink(attempt in 0u32..24) {
            let policy = BackoffPolicy::default();
            let delay = policy.delay_for_attempt(attempt);
            proptest::prop_assert!(delay <= policy.max_delay.max(policy.initial_delay));
            proptest::prop_assert!(delay >= policy.delay_for_attempt(attempt.saturating_sub(1)).min(policy.max_delay));
        }
    }
}
