use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff settings for per-channel delivery retries.
///
/// Attempt 1 runs immediately; after a failed attempt `k < max_attempts`
/// the dispatcher sleeps `initial_delay · multiplier^(k−1)` before attempt
/// `k + 1`. Retries within one channel are sequential.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Sleep before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each further failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The sleep after `failed_attempts` failures, or `None` once the
    /// attempt budget is exhausted.
    pub fn backoff_after(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }

        let factor = self.multiplier.powi(failed_attempts as i32 - 1);

        Some(self.initial_delay.mul_f64(factor.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
        };

        assert_eq!(policy.backoff_after(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.backoff_after(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.backoff_after(3), Some(Duration::from_millis(40)));
        assert_eq!(policy.backoff_after(4), None);
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let policy = RetryPolicy::no_retry();

        assert_eq!(policy.backoff_after(1), None);
    }
}
