//! Retry policy: attempt budget and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound for any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Largest jitter fraction added on top of the exponential delay.
pub const MAX_JITTER: f64 = 0.25;

/// Retry budget and backoff schedule for one class of endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Retries after the first attempt. Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::api()
    }
}

impl RetryPolicy {
    /// Policy for metadata-API calls.
    pub fn api() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_retries: 3,
            max_delay: MAX_BACKOFF,
        }
    }

    /// Policy for presigned storage PUTs: five attempts in total.
    pub fn storage() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: 4,
            max_delay: MAX_BACKOFF,
        }
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff after failed attempt `attempt` (0-based), with an explicit
    /// jitter fraction in `[0, MAX_JITTER]`.
    ///
    /// `base * 2^attempt * (1 + jitter)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = attempt.min(62) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp);
        let jitter = jitter.clamp(0.0, MAX_JITTER);
        let capped = (secs * (1.0 + jitter)).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Backoff after failed attempt `attempt` (0-based) with random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER);
        self.backoff(attempt, jitter)
    }
}
