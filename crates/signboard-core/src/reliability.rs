//! Reliability wrapper around one source execution.
//!
//! Order of checks for an execution:
//!
//! 1. parameter validation (a failure here is final: no fetch, no circuit step, no fallback)
//! 2. circuit-breaker gate
//! 3. timeout around the whole permitted call
//! 4. retry loop inside the timeout
//! 5. cached fallback when everything above failed
//!
//! The steps are exposed separately so the engine can run step 3-4 in an
//! isolated task and apply the state changes of step 2 and 5 itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::cache::{CacheEntry, FallbackCache};
use crate::circuit_breaker::{Admission, CircuitBook, CircuitBreakerConfig, CircuitState};
use crate::config::{FallbackPolicy, SourceInstanceConfig};
use crate::metrics::ExecutionOutcome;
use crate::retry::RetryPolicy;
use crate::source::{Parameters, Source, SourceError, SourceErrorKind};
use crate::state::StateDir;
use crate::ContentUnit;

/// Content returned by a successful permitted call.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub content: ContentUnit,
    /// Result of [`Source::should_emit`] for `content`.
    pub emit: bool,
}

/// Result of [`ReliabilityGuard::call`], before any state is updated.
pub type CallResult = Result<Fetched, SourceError>;

/// Final result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Content to render; `None` for hard failures and suppressed emissions.
    pub content: Option<ContentUnit>,
    pub outcome: ExecutionOutcome,
}

impl Settlement {
    pub fn failed(error: SourceError) -> Self {
        Self {
            content: None,
            outcome: ExecutionOutcome::Failed { error },
        }
    }
}

/// Circuit and fallback state for every source instance of one engine.
#[derive(Debug, Default)]
pub struct ReliabilityGuard {
    circuits: CircuitBook,
    cache: FallbackCache,
}

impl ReliabilityGuard {
    pub fn new(circuits: CircuitBook, cache: FallbackCache) -> Self {
        Self { circuits, cache }
    }

    pub fn in_memory(config: CircuitBreakerConfig) -> Self {
        Self::new(CircuitBook::in_memory(config), FallbackCache::in_memory())
    }

    /// Guard whose circuit snapshots and cache entries survive restarts.
    pub fn persistent(config: CircuitBreakerConfig, state_dir: StateDir) -> Self {
        Self::new(
            CircuitBook::persistent(config, state_dir.clone()),
            FallbackCache::persistent(state_dir),
        )
    }

    pub fn circuits(&self) -> &CircuitBook {
        &self.circuits
    }

    pub fn cache(&self) -> &FallbackCache {
        &self.cache
    }

    /// Runs [`Source::validate_configuration`], turning a panic into an internal error.
    pub fn validate(source: &dyn Source, parameters: &Parameters) -> Result<(), SourceError> {
        match catch_unwind(AssertUnwindSafe(|| {
            source.validate_configuration(parameters)
        })) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) if error.kind() == SourceErrorKind::Configuration => Err(error),
            Ok(Err(error)) => Err(SourceError::configuration(error.message())),
            Err(_) => Err(SourceError::internal("parameter validation panicked")),
        }
    }

    /// Circuit gate. A rejection carries a [`SourceErrorKind::CircuitOpen`] error.
    pub async fn admit(&self, source_id: &str) -> Result<(), SourceError> {
        let breaker = self.circuits.breaker(source_id).await;
        match breaker.admit() {
            Admission::Permitted => Ok(()),
            Admission::Rejected { retry_at } => {
                tracing::debug!(source_id, %retry_at, "circuit open; skipping fetch");
                Err(SourceError::circuit_open(format!(
                    "circuit open for '{source_id}' until {retry_at}"
                )))
            }
        }
    }

    /// One permitted call: the retry loop bounded by a single overall timeout.
    ///
    /// Touches no circuit or cache state, so the returned future may be
    /// dropped at any point.
    pub async fn call(
        source: &dyn Source,
        parameters: &Parameters,
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> CallResult {
        match tokio::time::timeout(timeout, Self::fetch_with_retry(source, parameters, retry)).await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::timeout(format!(
                "no result within {:.3}s",
                timeout.as_secs_f64()
            ))),
        }
    }

    async fn fetch_with_retry(
        source: &dyn Source,
        parameters: &Parameters,
        retry: &RetryPolicy,
    ) -> CallResult {
        let attempts = retry.attempts();
        let mut attempt = 1;
        loop {
            match source.fetch(parameters).await {
                Ok(content) => {
                    let emit = source.should_emit(&content);
                    return Ok(Fetched { content, emit });
                }
                Err(error) if attempt < attempts && error.retryable() => {
                    let delay = retry.delay_after_attempt(attempt);
                    tracing::debug!(
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "fetch attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Applies circuit bookkeeping and the cache for a finished call.
    ///
    /// Successful content is cached even when emission is suppressed.
    /// Circuit rejections do not count as failures. Every other error,
    /// including a configuration error raised by `fetch`, is recorded so a
    /// half-open trial always resolves.
    pub async fn settle(
        &self,
        source_id: &str,
        result: CallResult,
        fallback: &FallbackPolicy,
    ) -> Settlement {
        let error = match result {
            Ok(Fetched { content, emit }) => {
                self.record_success(source_id).await;
                if let Err(error) = self
                    .cache
                    .put(CacheEntry::new(source_id, content.clone()))
                    .await
                {
                    tracing::warn!(source_id, error = %error, "failed to persist cache entry");
                }
                return if emit {
                    Settlement {
                        outcome: ExecutionOutcome::Live {
                            data_points: content.data_points(),
                        },
                        content: Some(content),
                    }
                } else {
                    tracing::debug!(source_id, "source declined to emit content");
                    Settlement {
                        content: None,
                        outcome: ExecutionOutcome::Suppressed,
                    }
                };
            }
            Err(error) => error,
        };

        if error.kind() != SourceErrorKind::CircuitOpen {
            self.record_failure(source_id).await;
        }

        if fallback.use_cached {
            if let Some(entry) = self.cache.get_fresh(source_id, fallback.max_age).await {
                tracing::info!(
                    source_id,
                    captured_at = %entry.captured_at,
                    error = %error,
                    "serving cached content after failure"
                );
                return Settlement {
                    outcome: ExecutionOutcome::Fallback {
                        data_points: entry.content.data_points(),
                        error,
                    },
                    content: Some(entry.content),
                };
            }
        }

        tracing::warn!(source_id, error = %error, "source execution failed");
        Settlement::failed(error)
    }

    /// Validation, gate, call, and settlement in one step on the current task.
    pub async fn execute(
        &self,
        instance: &SourceInstanceConfig,
        source: &dyn Source,
    ) -> Settlement {
        if let Err(error) = Self::validate(source, &instance.parameters) {
            tracing::warn!(source_id = %instance.id, error = %error, "invalid source parameters");
            return Settlement::failed(error);
        }
        let result = match self.admit(&instance.id).await {
            Ok(()) => {
                Self::call(
                    source,
                    &instance.parameters,
                    instance.timeout,
                    &instance.retry,
                )
                .await
            }
            Err(rejected) => Err(rejected),
        };
        self.settle(&instance.id, result, &instance.fallback).await
    }

    async fn record_success(&self, source_id: &str) {
        let breaker = self.circuits.breaker(source_id).await;
        let was = breaker.state();
        breaker.record_success();
        if was != CircuitState::Closed {
            tracing::info!(source_id, "circuit closed after successful trial");
        }
        self.persist_circuit(source_id).await;
    }

    async fn record_failure(&self, source_id: &str) {
        let breaker = self.circuits.breaker(source_id).await;
        let was = breaker.state();
        breaker.record_failure();
        if breaker.state() == CircuitState::Open && was != CircuitState::Open {
            tracing::warn!(
                source_id,
                consecutive_failures = breaker.consecutive_failures(),
                next_attempt_at = ?breaker.next_attempt_at().map(|at| at.to_string()),
                "circuit opened"
            );
        }
        self.persist_circuit(source_id).await;
    }

    async fn persist_circuit(&self, source_id: &str) {
        if let Err(error) = self.circuits.persist(source_id).await {
            tracing::warn!(source_id, error = %error, "failed to persist circuit state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::SourceFuture;
    use crate::UtcDateTime;

    /// Fails the first `failures` fetches, then returns one line.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Source for Flaky {
        fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError> {
            if parameters.contains("reject") {
                return Err(SourceError::configuration("reject is not allowed"));
            }
            Ok(())
        }

        fn fetch<'a>(&'a self, _parameters: &'a Parameters) -> SourceFuture<'a> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    Err(SourceError::unavailable(format!("attempt {} failed", call + 1)))
                } else {
                    Ok(ContentUnit::from_lines(["ok"]))
                }
            })
        }
    }

    fn instance(id: &str) -> SourceInstanceConfig {
        SourceInstanceConfig::new(id, "flaky")
            .with_retry(RetryPolicy::with_schedule(3, Vec::new()))
            .with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn retries_until_success_within_one_call() {
        let guard = ReliabilityGuard::default();
        let source = Flaky::new(2);

        let settled = guard.execute(&instance("flaky"), source.as_ref()).await;

        assert_eq!(source.calls(), 3);
        assert_eq!(settled.outcome, ExecutionOutcome::Live { data_points: 1 });
        assert_eq!(guard.circuits().state_of("flaky"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn disabled_retry_makes_a_single_attempt() {
        let guard = ReliabilityGuard::default();
        let source = Flaky::new(usize::MAX);
        let instance = instance("once").with_retry(RetryPolicy::no_retry());

        let settled = guard.execute(&instance, source.as_ref()).await;

        assert_eq!(source.calls(), 1);
        assert!(settled.content.is_none());
    }

    #[tokio::test]
    async fn configuration_errors_skip_fetch_and_circuit() {
        let guard = ReliabilityGuard::default();
        let source = Flaky::new(0);
        let instance =
            instance("strict").with_parameters(Parameters::new().with("reject", true));

        let settled = guard.execute(&instance, source.as_ref()).await;

        assert_eq!(source.calls(), 0);
        match settled.outcome {
            ExecutionOutcome::Failed { error } => {
                assert_eq!(error.kind(), SourceErrorKind::Configuration)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(guard.circuits().state_of("strict"), None);
    }

    /// Fails every fetch with the error built by `fail`.
    struct Broken {
        fail: fn() -> SourceError,
        calls: AtomicUsize,
    }

    impl Broken {
        fn new(fail: fn() -> SourceError) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Source for Broken {
        fn validate_configuration(&self, _: &Parameters) -> Result<(), SourceError> {
            Ok(())
        }

        fn fetch<'a>(&'a self, _: &'a Parameters) -> SourceFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let error = (self.fail)();
            Box::pin(async move { Err(error) })
        }
    }

    #[tokio::test]
    async fn internal_errors_use_every_attempt() {
        let broken = Broken::new(|| SourceError::internal("bug"));

        let result = ReliabilityGuard::call(
            &broken,
            &Parameters::new(),
            Duration::from_secs(1),
            &RetryPolicy::with_schedule(3, Vec::new()),
        )
        .await;

        assert_eq!(broken.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.map_err(|error| error.kind()),
            Err(SourceErrorKind::Internal)
        );
    }

    #[tokio::test]
    async fn configuration_errors_from_fetch_stop_the_loop() {
        let broken = Broken::new(|| SourceError::configuration("missing 'text'"));

        let result = ReliabilityGuard::call(
            &broken,
            &Parameters::new(),
            Duration::from_secs(1),
            &RetryPolicy::with_schedule(5, vec![Duration::from_secs(10)]),
        )
        .await;

        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            result.map_err(|error| error.kind()),
            Err(SourceErrorKind::Configuration)
        );
    }

    #[tokio::test]
    async fn configuration_error_on_half_open_trial_reopens_the_circuit() {
        let guard = ReliabilityGuard::in_memory(CircuitBreakerConfig {
            failure_threshold: 1,
            base_backoff: Duration::from_millis(10),
            ..CircuitBreakerConfig::default()
        });
        let instance = instance("signs").with_retry(RetryPolicy::no_retry());
        let down = Broken::new(|| SourceError::unavailable("down"));
        let misconfigured = Broken::new(|| SourceError::configuration("missing 'text'"));

        guard.execute(&instance, &down).await;
        assert_eq!(guard.circuits().state_of("signs"), Some(CircuitState::Open));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let trial = guard.execute(&instance, &misconfigured).await;
        match trial.outcome {
            ExecutionOutcome::Failed { error } => {
                assert_eq!(error.kind(), SourceErrorKind::Configuration)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(guard.circuits().state_of("signs"), Some(CircuitState::Open));

        // Second failure doubles the backoff to 20ms.
        tokio::time::sleep(Duration::from_millis(40)).await;
        let recovered = guard.execute(&instance, Flaky::new(0).as_ref()).await;

        assert_eq!(recovered.outcome, ExecutionOutcome::Live { data_points: 1 });
        assert_eq!(guard.circuits().state_of("signs"), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn timeout_covers_the_whole_retry_loop() {
        let source = Flaky::new(usize::MAX);

        let result = ReliabilityGuard::call(
            source.as_ref(),
            &Parameters::new(),
            Duration::from_millis(50),
            &RetryPolicy::fixed(Duration::from_millis(40), 10),
        )
        .await;

        assert_eq!(
            result.map_err(|error| error.kind()),
            Err(SourceErrorKind::Timeout)
        );
        assert!(source.calls() < 10);
    }

    #[tokio::test]
    async fn suppressed_content_is_still_cached() {
        struct Quiet;

        impl Source for Quiet {
            fn validate_configuration(&self, _: &Parameters) -> Result<(), SourceError> {
                Ok(())
            }

            fn fetch<'a>(&'a self, _: &'a Parameters) -> SourceFuture<'a> {
                Box::pin(async { Ok(ContentUnit::from_lines(["same as before"])) })
            }

            fn should_emit(&self, _: &ContentUnit) -> bool {
                false
            }
        }

        let guard = ReliabilityGuard::default();
        let settled = guard.execute(&instance("quiet"), &Quiet).await;

        assert_eq!(settled.outcome, ExecutionOutcome::Suppressed);
        assert!(settled.content.is_none());
        let cached = guard.cache().get("quiet").await.expect("cached");
        assert_eq!(cached.content, ContentUnit::from_lines(["same as before"]));
    }

    #[tokio::test]
    async fn circuit_rejection_may_still_fall_back() {
        let guard = ReliabilityGuard::in_memory(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let cached = ContentUnit::from_lines(["yesterday"]);
        guard
            .cache()
            .put(
                CacheEntry::new("tides", cached.clone())
                    .captured_at(UtcDateTime::now().saturating_sub(Duration::from_secs(60))),
            )
            .await
            .expect("cached");
        let source = Flaky::new(usize::MAX);
        let instance = instance("tides")
            .with_retry(RetryPolicy::no_retry())
            .with_fallback(FallbackPolicy::cached_within(Duration::from_secs(3600)));

        let first = guard.execute(&instance, source.as_ref()).await;
        let second = guard.execute(&instance, source.as_ref()).await;

        assert_eq!(source.calls(), 1);
        assert_eq!(first.content.as_ref(), Some(&cached));
        match second.outcome {
            ExecutionOutcome::Fallback { error, .. } => {
                assert_eq!(error.kind(), SourceErrorKind::CircuitOpen)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(guard.circuits().state_of("tides"), Some(CircuitState::Open));
    }
}
