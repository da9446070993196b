//! Exponential backoff for connectivity retries

use std::time::Duration;

use crate::config::PoolConfig;

/// Delay sequence `base, 2*base, 4*base, ...` capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    retries: u32,
}

impl Backoff {
    /// Backoff with explicit base and cap
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            retries: 0,
        }
    }

    /// Backoff configured from pool settings
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay before the next retry
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.retries.min(31)).unwrap_or(u32::MAX);
        self.retries = self.retries.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.retries(), 5);
    }

    #[test]
    fn test_never_overflows() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(10));
        }
    }
}
