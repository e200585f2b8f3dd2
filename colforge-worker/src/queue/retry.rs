//! Retry backoff policy
//!
//! Exponential backoff with full jitter: the nth retry waits a random
//! duration between zero and `min(base * 2^(n-1), max)`. Jitter keeps
//! a burst of failures from re-dispatching in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Backoff ceiling for the nth retry (1-based), before jitter.
    fn ceiling(&self, retry_number: u32) -> Duration {
        let exponent = retry_number.saturating_sub(1).min(16);
        let scaled = self
            .config
            .base_delay
            .saturating_mul(1u32 << exponent);
        scaled.min(self.config.max_delay)
    }

    /// Jittered delay before the nth retry is re-enqueued.
    pub fn delay_for(&self, retry_number: u32) -> Duration {
        let ceiling = self.ceiling(retry_number);
        if ceiling.is_zero() {
            return ceiling;
        }
        let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        })
    }

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let policy = policy();
        assert_eq!(policy.ceiling(1), Duration::from_secs(60));
        assert_eq!(policy.ceiling(2), Duration::from_secs(120));
        assert_eq!(policy.ceiling(3), Duration::from_secs(240));
        assert_eq!(policy.ceiling(4), Duration::from_secs(480));
        assert_eq!(policy.ceiling(5), Duration::from_secs(600));
        assert_eq!(policy.ceiling(30), Duration::from_secs(600));
    }

    #[test]
    fn test_delay_stays_under_ceiling() {
        let policy = policy();
        for retry in 1..=5 {
            for _ in 0..50 {
                assert!(policy.delay_for(retry) <= policy.ceiling(retry));
            }
        }
    }
}
