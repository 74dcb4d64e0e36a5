use std::time::Duration;

use crate::config::BackoffConfig;

/// Delay before retrying a frame after a collision.
pub trait Backoff: Send {
    /// `attempt` counts from 1 for the first retry.
    fn delay(&mut self, attempt: u32) -> Duration;
}

/// Uniformly random delay in `[min, max]` milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RandomBackoff {
    min_ms: u64,
    max_ms: u64,
}

impl RandomBackoff {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms,
        }
    }
}

impl Backoff for RandomBackoff {
    fn delay(&mut self, _attempt: u32) -> Duration {
        Duration::from_millis(rand::random_range(self.min_ms..=self.max_ms))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&mut self, _attempt: u32) -> Duration {
        self.0
    }
}

pub fn from_config(config: &BackoffConfig) -> Box<dyn Backoff> {
    match *config {
        BackoffConfig::Random { min_ms, max_ms } => Box::new(RandomBackoff::new(min_ms, max_ms)),
        BackoffConfig::Fixed { delay_ms } => {
            Box::new(FixedBackoff(Duration::from_millis(delay_ms)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_within_bounds() {
        let mut backoff = RandomBackoff::new(10, 20);
        for attempt in 1..100 {
            let delay = backoff.delay(attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_from_config() {
        let mut fixed = from_config(&BackoffConfig::Fixed { delay_ms: 7 });
        assert_eq!(fixed.delay(1), Duration::from_millis(7));
        assert_eq!(fixed.delay(5), Duration::from_millis(7));

        let mut zero = from_config(&BackoffConfig::Random { min_ms: 0, max_ms: 0 });
        assert_eq!(zero.delay(3), Duration::ZERO);
    }
}
