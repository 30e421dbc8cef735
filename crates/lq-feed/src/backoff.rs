//! Bounded exponential backoff for reconnect scheduling.
//!
//! Attempt `n` (1-based) waits `min(base * 2^(n-1), max)`. With the default
//! 1 s base and 30 s cap, five attempts wait 1, 2, 4, 8 and 16 seconds.

use std::time::Duration;

use lq_core::config::FeedConfig;

/// Reconnect timing and ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: Duration::from_millis(1_000), max: Duration::from_millis(30_000), max_attempts: 5 }
    }
}

impl BackoffConfig {
    pub fn from_feed_config(cfg: &FeedConfig) -> Self {
        Self { base: cfg.reconnect_base(), max: cfg.reconnect_max(), max_attempts: cfg.max_reconnect_attempts }
    }
}

/// Attempt counter plus delay computation.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Count one more attempt and return how long to wait before it, or
    /// `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    /// Delay for 1-based attempt `n`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let shift = n.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.config.base.saturating_mul(factor).min(self.config.max)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
