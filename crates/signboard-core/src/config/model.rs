use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::retry::RetryPolicy;
use crate::source::Parameters;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;
pub const DEFAULT_MAX_AGE_HOURS: u32 = 24;
pub const MAX_AGE_HOURS_LIMIT: u32 = 168;
pub(crate) const DEFAULT_BACKOFF_SECONDS: [f64; 3] = [1.0, 2.0, 4.0];
pub(crate) const DEFAULT_SCHEDULE: &str = "* * * * *";

// Raw document shapes. Numeric fields are wide so range problems surface as
// structural issues instead of opaque parse errors.

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawDocument {
    pub sources: Vec<RawSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSource {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout: f64,
    #[serde(default, alias = "config")]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub retry: RawRetry,
    #[serde(default)]
    pub fallback: RawFallback,
    #[serde(default)]
    pub rendering: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawRetry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: Vec<f64>,
}

impl Default for RawRetry {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawFallback {
    #[serde(default)]
    pub use_cached: bool,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,
}

impl Default for RawFallback {
    fn default() -> Self {
        Self {
            use_cached: false,
            max_age_hours: default_max_age_hours(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_max_attempts() -> i64 {
    i64::from(DEFAULT_MAX_ATTEMPTS)
}

fn default_backoff_seconds() -> Vec<f64> {
    DEFAULT_BACKOFF_SECONDS.to_vec()
}

fn default_max_age_hours() -> f64 {
    f64::from(DEFAULT_MAX_AGE_HOURS)
}

/// Whether and how long a cached result may stand in for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub use_cached: bool,
    pub max_age: Duration,
}

impl FallbackPolicy {
    pub fn disabled() -> Self {
        Self {
            use_cached: false,
            max_age: Duration::from_secs(u64::from(DEFAULT_MAX_AGE_HOURS) * 3600),
        }
    }

    pub fn cached_within(max_age: Duration) -> Self {
        Self {
            use_cached: true,
            max_age,
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// One configured, validated use of a source type.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInstanceConfig {
    pub id: String,
    pub source_type: String,
    pub enabled: bool,
    /// Opaque to this crate; interpreted by the scheduler.
    pub schedule: String,
    pub timeout: Duration,
    pub parameters: Parameters,
    pub retry: RetryPolicy,
    pub fallback: FallbackPolicy,
    /// Renderer settings (`layout`, `background`, ...), passed through untouched.
    pub rendering: Map<String, Value>,
}

impl SourceInstanceConfig {
    /// Enabled instance with default timeout, retry, and fallback settings.
    pub fn new(id: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type: source_type.into(),
            enabled: true,
            schedule: DEFAULT_SCHEDULE.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            parameters: Parameters::new(),
            retry: RetryPolicy::default(),
            fallback: FallbackPolicy::default(),
            rendering: Map::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_rendering(mut self, rendering: Map<String, Value>) -> Self {
        self.rendering = rendering;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The validated collection of source instances, in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourcesConfig {
    sources: Vec<SourceInstanceConfig>,
}

impl SourcesConfig {
    pub(crate) fn from_validated(sources: Vec<SourceInstanceConfig>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[SourceInstanceConfig] {
        &self.sources
    }

    /// Enabled instances in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &SourceInstanceConfig> {
        self.sources.iter().filter(|source| source.enabled)
    }

    pub fn get(&self, id: &str) -> Option<&SourceInstanceConfig> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
