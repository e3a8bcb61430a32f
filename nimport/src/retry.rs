use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry behaviour for queued executions.
///
/// A job gets `max_retries + 1` attempts in total. Inline executions are
/// never retried.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 60_000,
            max_backoff_ms: 3_600_000, // 1 hour
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether a failed `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_retry_delay(attempt, self)
    }
}

/// Exponential backoff for the retry following a failed attempt.
///
/// Formula: delay = min(base_delay * 2^(attempt - 1), max_backoff)
pub fn compute_retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp = attempt.saturating_sub(1).min(63) as i32;
    let scaled = (policy.base_delay_ms as f64) * 2f64.powi(exp);
    let capped = scaled.min(policy.max_backoff_ms as f64);

    Duration::from_millis(capped.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_exponential() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn test_retry_delay_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_backoff_ms: 5000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_four_attempts_in_total() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_none_never_retries() {
        assert!(!RetryPolicy::none().should_retry(1));
        assert_eq!(compute_retry_delay(0, &RetryPolicy::default()), Duration::ZERO);
    }
}
