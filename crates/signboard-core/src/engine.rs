//! Concurrent execution of configured source instances.
//!
//! A batch runs every enabled instance at once. Each instance gets its own
//! task, and each permitted fetch runs in a further task watched by a
//! deadline of `timeout + grace`, so a provider that ignores cancellation
//! or blocks its thread cannot hold up the batch. Circuit and cache state
//! is only touched after that inner task finished or was abandoned.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::{ConfigLoader, SourceInstanceConfig, SourcesConfig};
use crate::metrics::{ExecutionMetrics, ExecutionOutcome, MetricsLog, MetricsRecorder};
use crate::registry::{RegistryError, SourceRegistry};
use crate::reliability::{CallResult, ReliabilityGuard, Settlement};
use crate::source::{Source, SourceError};
use crate::state::StateDir;
use crate::{ContentUnit, UtcDateTime};

pub const DEFAULT_WATCHDOG_GRACE: Duration = Duration::from_secs(1);

const STATE_DIR_ENV: &str = "SIGNBOARD_STATE_DIR";
const METRICS_LOG_ENV: &str = "SIGNBOARD_METRICS_LOG";
const CIRCUIT_THRESHOLD_ENV: &str = "SIGNBOARD_CIRCUIT_THRESHOLD";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source '{source_id}' is not configured or is disabled")]
    SourceNotRunnable { source_id: String },

    #[error("failed to construct source '{source_id}': {source}")]
    Construction {
        source_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("invalid value '{value}' for {name}")]
    InvalidEnvironment { name: &'static str, value: String },
}

/// Content produced by one instance in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    pub source_id: String,
    pub content: Option<ContentUnit>,
}

/// Everything a batch produced, in configuration order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: UtcDateTime,
    pub elapsed: Duration,
    pub results: Vec<SourceResult>,
    pub metrics: Vec<ExecutionMetrics>,
}

impl BatchReport {
    /// Executions that produced a success record, including fallbacks.
    pub fn succeeded(&self) -> usize {
        self.metrics.iter().filter(|record| record.success).count()
    }

    pub fn failed(&self) -> usize {
        self.metrics.len() - self.succeeded()
    }

    pub fn content_for(&self, source_id: &str) -> Option<&ContentUnit> {
        self.results
            .iter()
            .find(|result| result.source_id == source_id)
            .and_then(|result| result.content.as_ref())
    }

    pub fn metrics_for(&self, source_id: &str) -> Option<&ExecutionMetrics> {
        self.metrics
            .iter()
            .find(|record| record.source_id == source_id)
    }
}

/// Builder for [`ExecutionEngine`].
///
/// # Example
///
/// ```rust,ignore
/// use signboard_core::EngineBuilder;
///
/// let engine = EngineBuilder::from_env()?
///     .with_watchdog_grace(std::time::Duration::from_millis(500))
///     .build();
/// ```
#[derive(Debug)]
pub struct EngineBuilder {
    registry: Option<SourceRegistry>,
    state_dir: Option<PathBuf>,
    metrics_log: Option<PathBuf>,
    circuit: CircuitBreakerConfig,
    watchdog_grace: Duration,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// In-memory state, no metrics log, built-in providers.
    pub fn new() -> Self {
        Self {
            registry: None,
            state_dir: None,
            metrics_log: None,
            circuit: CircuitBreakerConfig::default(),
            watchdog_grace: DEFAULT_WATCHDOG_GRACE,
        }
    }

    /// Reads `SIGNBOARD_STATE_DIR`, `SIGNBOARD_METRICS_LOG` and
    /// `SIGNBOARD_CIRCUIT_THRESHOLD`. Unset variables keep the defaults.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut builder = Self::new();
        if let Some(state_dir) = non_empty_var(STATE_DIR_ENV) {
            builder = builder.with_state_dir(state_dir);
        }
        if let Some(metrics_log) = non_empty_var(METRICS_LOG_ENV) {
            builder = builder.with_metrics_log(metrics_log);
        }
        if let Some(threshold) = non_empty_var(CIRCUIT_THRESHOLD_ENV) {
            let parsed = threshold
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(EngineError::InvalidEnvironment {
                    name: CIRCUIT_THRESHOLD_ENV,
                    value: threshold,
                })?;
            builder = builder.with_failure_threshold(parsed);
        }
        Ok(builder)
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Persists circuit snapshots and cache entries under `path`.
    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(path.into());
        self
    }

    /// Appends one NDJSON metrics line per execution to `path`.
    pub fn with_metrics_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_log = Some(path.into());
        self
    }

    pub fn with_circuit_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = config;
        self
    }

    /// Consecutive failures that open a circuit; values below 1 become 1.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit.failure_threshold = threshold.max(1);
        self
    }

    /// Extra time granted past an instance timeout before its task is abandoned.
    pub fn with_watchdog_grace(mut self, grace: Duration) -> Self {
        self.watchdog_grace = grace;
        self
    }

    pub fn build(self) -> ExecutionEngine {
        let guard = match self.state_dir {
            Some(path) => ReliabilityGuard::persistent(self.circuit, StateDir::new(path)),
            None => ReliabilityGuard::in_memory(self.circuit),
        };
        ExecutionEngine {
            registry: self
                .registry
                .unwrap_or_else(SourceRegistry::with_builtin_providers),
            guard: Arc::new(guard),
            metrics_log: self.metrics_log.map(MetricsLog::new),
            watchdog_grace: self.watchdog_grace,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Runs batches of source instances with isolation between them.
///
/// At most one batch should run per engine at a time; the engine does not
/// guard an instance id against overlapping executions.
#[derive(Debug)]
pub struct ExecutionEngine {
    registry: SourceRegistry,
    guard: Arc<ReliabilityGuard>,
    metrics_log: Option<MetricsLog>,
    watchdog_grace: Duration,
}

impl ExecutionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &ReliabilityGuard {
        &self.guard
    }

    pub fn metrics_log(&self) -> Option<&MetricsLog> {
        self.metrics_log.as_ref()
    }

    /// Loader validating documents against this engine's registry.
    pub fn config_loader(&self) -> ConfigLoader<'_> {
        ConfigLoader::new(&self.registry)
    }

    /// Executes every enabled instance.
    pub async fn run(&self, config: &SourcesConfig) -> Result<BatchReport, EngineError> {
        self.run_batch(config.enabled().collect()).await
    }

    /// Executes a single enabled instance.
    pub async fn run_only(
        &self,
        config: &SourcesConfig,
        source_id: &str,
    ) -> Result<BatchReport, EngineError> {
        let instance = config
            .get(source_id)
            .filter(|instance| instance.enabled)
            .ok_or_else(|| EngineError::SourceNotRunnable {
                source_id: source_id.to_owned(),
            })?;
        self.run_batch(vec![instance]).await
    }

    async fn run_batch(
        &self,
        instances: Vec<&SourceInstanceConfig>,
    ) -> Result<BatchReport, EngineError> {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %batch_id);
        self.execute_batch(batch_id, instances).instrument(span).await
    }

    async fn execute_batch(
        &self,
        batch_id: Uuid,
        instances: Vec<&SourceInstanceConfig>,
    ) -> Result<BatchReport, EngineError> {
        let started_at = UtcDateTime::now();
        let started = Instant::now();

        let mut prepared = Vec::with_capacity(instances.len());
        for instance in instances {
            let source = self
                .registry
                .create(&instance.source_type, &instance.id, &instance.parameters)
                .map_err(|source| EngineError::Construction {
                    source_id: instance.id.clone(),
                    source,
                })?;
            prepared.push((instance.clone(), source));
        }
        tracing::info!(sources = prepared.len(), "starting batch");

        let mut handles = Vec::with_capacity(prepared.len());
        for (instance, source) in prepared {
            let span = tracing::info_span!(
                "source",
                source_id = %instance.id,
                source_type = %instance.source_type
            );
            let source_id = instance.id.clone();
            let source_type = instance.source_type.clone();
            let guard = Arc::clone(&self.guard);
            let grace = self.watchdog_grace;
            let handle = tokio::spawn(
                async move {
                    let recorder = MetricsRecorder::start(&instance.id, &instance.source_type);
                    let settlement = execute_instance(&guard, &instance, source, grace).await;
                    (settlement.content, recorder.finish(&settlement.outcome))
                }
                .instrument(span),
            );
            handles.push((source_id, source_type, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut metrics = Vec::with_capacity(handles.len());
        for (source_id, source_type, handle) in handles {
            let (content, record) = match handle.await {
                Ok(finished) => finished,
                Err(error) => {
                    tracing::error!(source_id = %source_id, error = %error, "execution task failed");
                    let outcome = ExecutionOutcome::Failed {
                        error: SourceError::internal(format!("execution task failed: {error}")),
                    };
                    (None, MetricsRecorder::start(&source_id, source_type).finish(&outcome))
                }
            };
            results.push(SourceResult { source_id, content });
            metrics.push(record);
        }

        let report = BatchReport {
            batch_id,
            started_at,
            elapsed: started.elapsed(),
            results,
            metrics,
        };

        if let Some(log) = &self.metrics_log {
            if !report.metrics.is_empty() {
                if let Err(error) = log.append_batch(&report.metrics).await {
                    tracing::error!(
                        path = %log.path().display(),
                        error = %error,
                        "failed to append metrics batch"
                    );
                }
            }
        }
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );

        Ok(report)
    }
}

async fn execute_instance(
    guard: &ReliabilityGuard,
    instance: &SourceInstanceConfig,
    source: Arc<dyn Source>,
    grace: Duration,
) -> Settlement {
    if let Err(error) = ReliabilityGuard::validate(source.as_ref(), &instance.parameters) {
        tracing::warn!(error = %error, "invalid source parameters");
        return Settlement::failed(error);
    }

    let result = match guard.admit(&instance.id).await {
        Ok(()) => supervised_call(source, instance, grace).await,
        Err(rejected) => Err(rejected),
    };
    guard.settle(&instance.id, result, &instance.fallback).await
}

/// Runs the permitted call in its own task and abandons it past `timeout + grace`.
async fn supervised_call(
    source: Arc<dyn Source>,
    instance: &SourceInstanceConfig,
    grace: Duration,
) -> CallResult {
    let parameters = instance.parameters.clone();
    let retry = instance.retry.clone();
    let timeout = instance.timeout;
    let mut handle = tokio::spawn(
        async move { ReliabilityGuard::call(source.as_ref(), &parameters, timeout, &retry).await }
            .in_current_span(),
    );

    let deadline = timeout.saturating_add(grace);
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(error)) if error.is_panic() => {
            tracing::error!("source panicked during fetch");
            Err(SourceError::internal("source panicked during fetch"))
        }
        Ok(Err(error)) => Err(SourceError::internal(format!(
            "fetch task ended unexpectedly: {error}"
        ))),
        Err(_) => {
            handle.abort();
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                "source ignored cancellation; abandoning fetch task"
            );
            Err(SourceError::timeout(format!(
                "no result within {:.3}s",
                timeout.as_secs_f64()
            )))
        }
    }
}
