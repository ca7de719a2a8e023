//! Retry budget and exponential backoff with a cap.
//!
//! Delays are attempt-indexed and never decrease from one attempt to the
//! next, so a batch that keeps failing backs off until it reaches the cap.

use std::time::Duration;

use serde::Deserialize;

use crate::config::duration_ms;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay cap.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor per attempt. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Maximum number of retries after the initial attempt. `None` retries
    /// until every operation resolves.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// Config with a bounded number of retries and default delays.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Config that never sleeps between attempts.
    pub fn immediate(max_retries: Option<u32>) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            max_retries,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// delay = initial * multiplier^attempt, capped at max_delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);

        let delay_ms = (initial_ms * factor).min(max_ms);
        if delay_ms.is_finite() {
            Duration::from_millis(delay_ms as u64)
        } else {
            self.max_delay
        }
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.map_or(true, |max| attempt < max)
    }

    /// Budget shown in logs and error messages.
    pub fn max_retries_display(&self) -> u32 {
        self.max_retries.unwrap_or(u32::MAX)
    }
}
