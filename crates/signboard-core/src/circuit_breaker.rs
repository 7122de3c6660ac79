//! Per-instance circuit breaker.
//!
//! ```text
//! Closed   --failures >= threshold-->  Open (next attempt = now + backoff)
//! Open     --now >= next attempt-->    HalfOpen (one trial call)
//! HalfOpen --trial succeeds-->         Closed (failures reset)
//! HalfOpen --trial fails-->            Open (backoff doubled, capped)
//! ```
//!
//! `backoff(failures) = base * 2^(failures - threshold)`, capped at `max_backoff`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;
use crate::state::{StateDir, StateError, StateKind};
use crate::UtcDateTime;

/// Runtime circuit state for one source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl CircuitBreakerConfig {
    /// Open period after `failures` consecutive failures.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        Backoff::Exponential {
            base: self.base_backoff,
            factor: 2.0,
            max: self.max_backoff,
        }
        .delay(failures.saturating_sub(self.failure_threshold.max(1)))
    }
}

/// Serializable view of a breaker, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<UtcDateTime>,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Permitted,
    Rejected { retry_at: UtcDateTime },
}

impl Admission {
    pub const fn is_permitted(self) -> bool {
        matches!(self, Self::Permitted)
    }
}

#[derive(Debug, Default)]
struct CircuitInner {
    snapshot: CircuitSnapshot,
    trial_in_flight: bool,
}

/// Thread-safe circuit breaker for one source instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::from_snapshot(config, CircuitSnapshot::default())
    }

    pub fn from_snapshot(config: CircuitBreakerConfig, snapshot: CircuitSnapshot) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner {
                snapshot,
                trial_in_flight: false,
            }),
        }
    }

    pub fn admit(&self) -> Admission {
        self.admit_at(UtcDateTime::now())
    }

    pub fn admit_at(&self, now: UtcDateTime) -> Admission {
        let mut inner = self.lock();
        match inner.snapshot.state {
            CircuitState::Closed => Admission::Permitted,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected {
                        retry_at: inner.snapshot.next_attempt_at.unwrap_or(now),
                    }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Permitted
                }
            }
            CircuitState::Open => {
                let eligible_at = inner.snapshot.next_attempt_at.unwrap_or(now);
                if now >= eligible_at {
                    inner.snapshot.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Admission::Permitted
                } else {
                    Admission::Rejected {
                        retry_at: eligible_at,
                    }
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.snapshot.state = CircuitState::Closed;
        inner.snapshot.consecutive_failures = 0;
        inner.snapshot.next_attempt_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(UtcDateTime::now());
    }

    pub fn record_failure_at(&self, now: UtcDateTime) {
        let mut inner = self.lock();
        let failures = inner.snapshot.consecutive_failures.saturating_add(1);
        inner.snapshot.consecutive_failures = failures;
        inner.snapshot.last_failure_at = Some(now);
        inner.trial_in_flight = false;

        let should_open = inner.snapshot.state != CircuitState::Closed
            || failures >= self.config.failure_threshold;
        if should_open {
            inner.snapshot.state = CircuitState::Open;
            inner.snapshot.next_attempt_at =
                Some(now.saturating_add(self.config.backoff_for(failures)));
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().snapshot.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().snapshot.consecutive_failures
    }

    pub fn next_attempt_at(&self) -> Option<UtcDateTime> {
        self.lock().snapshot.next_attempt_at
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock().snapshot.clone()
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One breaker per source instance id, created closed at first reference.
#[derive(Debug)]
pub struct CircuitBook {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    state_dir: Option<StateDir>,
}

impl Default for CircuitBook {
    fn default() -> Self {
        Self::in_memory(CircuitBreakerConfig::default())
    }
}

impl CircuitBook {
    pub fn in_memory(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            state_dir: None,
        }
    }

    /// Book whose snapshots are loaded from and saved to `state_dir`.
    pub fn persistent(config: CircuitBreakerConfig, state_dir: StateDir) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            state_dir: Some(state_dir),
        }
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Returns the breaker for `source_id`, loading a persisted snapshot on first use.
    pub async fn breaker(&self, source_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.lock().get(source_id) {
            return Arc::clone(existing);
        }

        let snapshot = match &self.state_dir {
            Some(state_dir) => match state_dir
                .read::<CircuitSnapshot>(StateKind::Circuit, source_id)
                .await
            {
                Ok(snapshot) => snapshot.unwrap_or_default(),
                Err(error) => {
                    tracing::warn!(
                        source_id,
                        error = %error,
                        "ignoring unreadable circuit snapshot; starting closed"
                    );
                    CircuitSnapshot::default()
                }
            },
            None => CircuitSnapshot::default(),
        };

        let mut breakers = self.lock();
        let breaker = breakers
            .entry(source_id.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::from_snapshot(self.config, snapshot)));
        Arc::clone(breaker)
    }

    /// Current state for `source_id` without creating a breaker.
    pub fn state_of(&self, source_id: &str) -> Option<CircuitState> {
        self.lock().get(source_id).map(|breaker| breaker.state())
    }

    /// Saves the breaker snapshot for `source_id` when persistence is enabled.
    pub async fn persist(&self, source_id: &str) -> Result<(), StateError> {
        let Some(state_dir) = &self.state_dir else {
            return Ok(());
        };
        let Some(snapshot) = self.lock().get(source_id).map(|breaker| breaker.snapshot()) else {
            return Ok(());
        };
        state_dir
            .write(StateKind::Circuit, source_id, &snapshot)
            .await
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
