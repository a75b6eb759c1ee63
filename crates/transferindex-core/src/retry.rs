//! Exponential backoff policy shared by the RPC transport and the live watcher.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Unlimited retries between `initial` and `max`, doubling each time.
    pub fn unbounded(initial: Duration, max: Duration) -> Self {
        Self {
            max_retries: None,
            initial_backoff: initial,
            max_backoff: max,
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy: computes the delay for a given attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once retries are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base_ms =
            self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exp);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Returns `true` if a retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.config.max_retries {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn unbounded_policy_caps_delay() {
        let policy = RetryPolicy::new(RetryConfig::unbounded(
            Duration::from_millis(500),
            Duration::from_secs(60),
        ));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(1_000), Some(Duration::from_secs(60)));
        assert!(policy.should_retry(u32::MAX));
    }
}
