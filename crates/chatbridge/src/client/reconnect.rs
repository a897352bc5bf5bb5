//! Reconnect backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff applied after a disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub initial_delay_ms: u64,
    /// Factor applied to the delay after each attempt.
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Attempts before giving up. Zero disables reconnecting.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Some(Duration::from_millis(delay as u64))
    }
}
