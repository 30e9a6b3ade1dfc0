//! Exponential-backoff retry state for supervised plugins.

use crate::types::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Tracks the backoff state across one plugin's restarts.
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    current_delay: Duration,
    retries: u32,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        let current_delay = config.delay;
        Self {
            config,
            current_delay,
            retries: 0,
        }
    }

    /// Back to the initial delay after a successful recovery.
    pub fn reset(&mut self) {
        self.current_delay = self.config.delay;
        self.retries = 0;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The next wait: `current_delay + uniform(0, max_jitter)`, doubling the
    /// delay up to `max_delay`. Returns `None` once the retry budget is
    /// exhausted (`max_retries` of -1 never exhausts).
    pub fn next_wait(&mut self) -> Option<Duration> {
        if self.config.max_retries >= 0 && self.retries >= self.config.max_retries as u32 {
            return None;
        }
        self.retries += 1;

        let jitter_ms = self.config.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        let wait = self.current_delay + jitter;
        self.current_delay = (self.current_delay * 2).min(self.config.max_delay);
        Some(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: i32) -> RetryConfig {
        RetryConfig {
            delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
            max_jitter: Duration::ZERO,
            max_retries,
        }
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let mut retry = RetryState::new(no_jitter(-1));
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(250)));
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(500)));
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(1000)));
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn budget_exhausts_after_max_retries() {
        let mut retry = RetryState::new(no_jitter(2));
        assert!(retry.next_wait().is_some());
        assert!(retry.next_wait().is_some());
        assert!(retry.next_wait().is_none());
        assert_eq!(retry.retries(), 2);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut retry = RetryState::new(no_jitter(1));
        assert!(retry.next_wait().is_some());
        assert!(retry.next_wait().is_none());

        retry.reset();
        assert_eq!(retry.next_wait(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let mut retry = RetryState::new(RetryConfig {
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(50),
            max_retries: -1,
        });
        for _ in 0..20 {
            let base = Duration::from_millis(100);
            let wait = retry.next_wait().unwrap();
            assert!(wait >= base.min(Duration::from_secs(1)) || wait >= Duration::from_millis(100));
            assert!(wait <= Duration::from_secs(1) + Duration::from_millis(50));
        }
    }
}
