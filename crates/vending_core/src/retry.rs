use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry schedule for an expensive, rate-limited step.
///
/// The n-th retry waits `interval * backoff_rate^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval_secs: u64,
    pub backoff_rate: f64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 3 * 60 * 60,
            backoff_rate: 1.5,
            max_attempts: 50,
            max_delay_secs: 24 * 60 * 60,
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval policy.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval_secs: interval.as_secs(),
            backoff_rate: 1.0,
            max_attempts,
            max_delay_secs: interval.as_secs(),
        }
    }

    /// Delay before the retry that follows `failed_attempts` failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = (self.interval_secs as f64) * self.backoff_rate.max(1.0).powi(exponent);
        let capped = delay.min(self.max_delay_secs as f64);
        Duration::from_secs(capped as u64)
    }

    pub fn allows_another_attempt(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_mildly_and_caps() {
        let policy = RetryPolicy {
            interval_secs: 3_600,
            backoff_rate: 1.5,
            max_attempts: 10,
            max_delay_secs: 7_200,
        };

        assert_eq!(policy.delay_after(1), Duration::from_secs(3_600));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5_400));
        assert_eq!(policy.delay_after(3), Duration::from_secs(7_200));
        assert_eq!(policy.delay_after(40), Duration::from_secs(7_200));
    }

    #[test]
    fn attempt_ceiling_counts_the_first_attempt() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5), 3);
        assert!(policy.allows_another_attempt(1));
        assert!(policy.allows_another_attempt(2));
        assert!(!policy.allows_another_attempt(3));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
    }
}
