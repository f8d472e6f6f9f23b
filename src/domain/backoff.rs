//! Reconnect Backoff - Capped Exponential Delay
//!
//! Delay for consecutive failure `n` (1-based) is `base * 2^(n-1)`,
//! capped at `max`. Monotonically non-decreasing in `n`.

use std::time::Duration;

/// Exponential backoff policy with a ceiling on the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a policy. `max` below `base` is raised to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay to wait before retry number `failures` (1 = first failure).
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// First-retry delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay ceiling.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }
}
