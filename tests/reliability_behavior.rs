//! Behavior tests for the reliability wrapper: retry, circuit breaker,
//! and cached fallback around a single source execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signboard_core::{
    CacheEntry, CircuitBreakerConfig, CircuitState, ContentUnit, ExecutionOutcome,
    FallbackPolicy, Parameters, ReliabilityGuard, RetryPolicy, Source, SourceError,
    SourceErrorKind, SourceFuture, SourceInstanceConfig, StateDir, UtcDateTime,
};

/// Counts fetches; fails while `failing` is set.
struct Scripted {
    calls: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    lines: Vec<String>,
}

impl Scripted {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: true.into(),
            lines: Vec::new(),
        })
    }

    fn succeeding(lines: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: false.into(),
            lines: lines.iter().map(|line| (*line).to_owned()).collect(),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Source for Scripted {
    fn validate_configuration(&self, _parameters: &Parameters) -> Result<(), SourceError> {
        Ok(())
    }

    fn fetch<'a>(&'a self, _parameters: &'a Parameters) -> SourceFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(SourceError::unavailable("upstream down"))
            } else {
                Ok(ContentUnit::from_lines(self.lines.clone()))
            }
        })
    }
}

fn instance(id: &str, attempts: u32) -> SourceInstanceConfig {
    SourceInstanceConfig::new(id, "scripted")
        .with_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::with_schedule(attempts, vec![Duration::from_millis(1)]))
}

fn hours(value: u64) -> Duration {
    Duration::from_secs(value * 3600)
}

// =============================================================================
// Reliability: Retry
// =============================================================================

#[tokio::test]
async fn when_fetch_always_fails_each_permitted_call_makes_max_attempts() {
    // Given: three attempts per call and a provider that always fails
    let guard = ReliabilityGuard::default();
    let source = Scripted::failing();

    // When: one execution runs
    let settled = guard.execute(&instance("ferry_default", 3), source.as_ref()).await;

    // Then: fetch ran exactly three times and the circuit moved one step
    assert_eq!(source.calls(), 3);
    assert!(settled.content.is_none());
    let breaker = guard.circuits().breaker("ferry_default").await;
    assert_eq!(breaker.consecutive_failures(), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// =============================================================================
// Reliability: Circuit Breaker
// =============================================================================

#[tokio::test]
async fn when_threshold_failures_accumulate_the_next_call_skips_fetch() {
    // Given: the default threshold of three consecutive failures
    let guard = ReliabilityGuard::default();
    let source = Scripted::failing();
    let instance = instance("ferry_default", 1);
    for _ in 0..3 {
        guard.execute(&instance, source.as_ref()).await;
    }
    assert_eq!(
        guard.circuits().state_of("ferry_default"),
        Some(CircuitState::Open)
    );
    let calls_before = source.calls();

    // When: another execution is issued immediately
    let settled = guard.execute(&instance, source.as_ref()).await;

    // Then: it fails with a circuit-open error and fetch is not invoked
    assert_eq!(source.calls(), calls_before);
    match settled.outcome {
        ExecutionOutcome::Failed { error } => {
            assert_eq!(error.kind(), SourceErrorKind::CircuitOpen)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn when_backoff_elapses_a_successful_trial_closes_the_circuit() {
    // Given: a circuit opened with a short backoff
    let guard = ReliabilityGuard::in_memory(CircuitBreakerConfig {
        failure_threshold: 1,
        base_backoff: Duration::from_millis(30),
        max_backoff: Duration::from_millis(30),
    });
    let source = Scripted::failing();
    let instance = instance("tram", 1);
    guard.execute(&instance, source.as_ref()).await;
    assert_eq!(guard.circuits().state_of("tram"), Some(CircuitState::Open));

    // When: the backoff passes and the provider recovers
    tokio::time::sleep(Duration::from_millis(60)).await;
    source.set_failing(false);
    let settled = guard.execute(&instance, source.as_ref()).await;

    // Then: the trial call succeeds and the circuit closes
    assert!(matches!(settled.outcome, ExecutionOutcome::Live { .. }));
    assert_eq!(guard.circuits().state_of("tram"), Some(CircuitState::Closed));
    assert_eq!(
        guard.circuits().breaker("tram").await.consecutive_failures(),
        0
    );
}

#[tokio::test]
async fn when_state_is_persisted_an_open_circuit_survives_a_restart() {
    // Given: a persistent guard whose circuit opened
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    };
    let source = Scripted::failing();
    let instance = instance("weather_home", 1);
    ReliabilityGuard::persistent(config, StateDir::new(dir.path()))
        .execute(&instance, source.as_ref())
        .await;

    // When: a new guard over the same directory runs the instance
    let restarted = ReliabilityGuard::persistent(config, StateDir::new(dir.path()));
    let settled = restarted.execute(&instance, source.as_ref()).await;

    // Then: the call is rejected without fetching
    assert_eq!(source.calls(), 1);
    match settled.outcome {
        ExecutionOutcome::Failed { error } => {
            assert_eq!(error.kind(), SourceErrorKind::CircuitOpen)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// =============================================================================
// Reliability: Cached Fallback
// =============================================================================

async fn failure_with_cache_aged(age: Duration) -> (Option<ContentUnit>, ExecutionOutcome) {
    let guard = ReliabilityGuard::default();
    let cached = ContentUnit::from_lines(["54°F", "Light rain"]);
    guard
        .cache()
        .put(
            CacheEntry::new("weather_home", cached)
                .captured_at(UtcDateTime::now().saturating_sub(age)),
        )
        .await
        .expect("cached");
    let instance = instance("weather_home", 1)
        .with_fallback(FallbackPolicy::cached_within(hours(24)));

    let settled = guard.execute(&instance, Scripted::failing().as_ref()).await;
    (settled.content, settled.outcome)
}

#[tokio::test]
async fn when_cache_is_within_max_age_a_failure_serves_cached_content() {
    // Given/When: a 2 hour old entry against a 24 hour limit, then a failure
    let (content, outcome) = failure_with_cache_aged(hours(2)).await;

    // Then: the cached payload is returned as a fallback success
    assert_eq!(content, Some(ContentUnit::from_lines(["54°F", "Light rain"])));
    match outcome {
        ExecutionOutcome::Fallback { data_points, error } => {
            assert_eq!(data_points, 2);
            assert_eq!(error.kind(), SourceErrorKind::Unavailable);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn when_cache_is_older_than_max_age_a_failure_yields_nothing() {
    // Given/When: a 30 hour old entry against a 24 hour limit, then a failure
    let (content, outcome) = failure_with_cache_aged(hours(30)).await;

    // Then: no content and a hard failure
    assert_eq!(content, None);
    assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
}

#[tokio::test]
async fn when_fallback_is_disabled_a_fresh_cache_is_ignored() {
    let guard = ReliabilityGuard::default();
    guard
        .cache()
        .put(CacheEntry::new("ticker", ContentUnit::from_lines(["old"])))
        .await
        .expect("cached");

    let settled = guard
        .execute(&instance("ticker", 1), Scripted::failing().as_ref())
        .await;

    assert_eq!(settled.content, None);
}

#[tokio::test]
async fn cached_payload_round_trips_unchanged_through_disk() {
    // Given: a persistent guard and a provider that succeeds once
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Scripted::succeeding(&["Ferry 10:15 → Sausalito", "On time ✓"]);
    let instance = instance("ferry_default", 1)
        .with_fallback(FallbackPolicy::cached_within(hours(24)));
    let first = ReliabilityGuard::persistent(CircuitBreakerConfig::default(), StateDir::new(dir.path()))
        .execute(&instance, source.as_ref())
        .await;
    let live = first.content.expect("live content");

    // When: a fresh guard falls back after a failure
    source.set_failing(true);
    let second = ReliabilityGuard::persistent(CircuitBreakerConfig::default(), StateDir::new(dir.path()))
        .execute(&instance, source.as_ref())
        .await;

    // Then: the fallback payload serializes to exactly the same bytes
    let fallback = second.content.expect("fallback content");
    assert_eq!(
        serde_json::to_vec(&fallback).expect("serializable"),
        serde_json::to_vec(&live).expect("serializable")
    );
    assert!(matches!(second.outcome, ExecutionOutcome::Fallback { .. }));
}
