//! Retry policy and backoff schedules.

use std::time::Duration;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ step)`, capped at `max`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent step.
        factor: f64,
        /// The maximum duration to wait.
        max: Duration,
    },
    /// Uses an explicit ordered list of delays; the last delay repeats once
    /// the list is exhausted, and an empty list means no delay.
    Schedule(Vec<Duration>),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Schedule(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ])
    }
}

impl Backoff {
    /// Calculate the delay for a given step (0-based).
    pub fn delay(&self, step: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base, factor, max } => {
                let scale = factor.powi(step.min(i32::MAX as u32) as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());
                if capped_seconds.is_finite() && capped_seconds >= 0.0 {
                    Duration::from_secs_f64(capped_seconds)
                } else {
                    *max
                }
            }
            Self::Schedule(delays) => delays
                .get(step as usize)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// Per-instance retry behavior for one permitted call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Enables or disables retries. Disabled means exactly one attempt.
    pub enabled: bool,
    /// Total attempts per permitted call, including the first.
    pub max_attempts: u32,
    /// Delays slept between attempts, never after the last one.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Retry policy with an explicit delay schedule.
    pub fn with_schedule(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            enabled: true,
            max_attempts,
            backoff: Backoff::Schedule(delays),
        }
    }

    /// Retry policy with a fixed delay between attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            enabled: true,
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            backoff: Backoff::Schedule(Vec::new()),
        }
    }

    /// Number of fetch attempts a permitted call may issue (at least one).
    pub fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay slept after the given failed attempt (1-based) before the next one.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt.saturating_sub(1))
    }
}
