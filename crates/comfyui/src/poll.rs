//! Backoff for polling `/history` while a prompt executes.

use std::time::Duration;

/// Tunable parameters for the polling backoff.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the first history check.
    pub initial_delay: Duration,
    /// Upper bound on the delay between checks.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each pending answer.
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next polling delay, clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}
