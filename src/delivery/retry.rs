//! 重试策略 - collector 连接的线性退避

use std::time::Duration;

/// Bounded attempts, delay growing by a fixed increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            increment: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, increment: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            increment,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base + (attempt - 1) * increment`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay + self.increment * attempt.saturating_sub(1)
    }

    /// Whether another attempt follows `attempt`
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
