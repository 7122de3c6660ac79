//! Source contract and structured provider errors.
//!
//! Every provider type implements [`Source`]. The engine calls
//! [`Source::validate_configuration`] before each execution, then
//! [`Source::fetch`] under the reliability wrapper, then
//! [`Source::should_emit`] on the fetched content.
//!
//! # Example Implementation
//!
//! ```rust,ignore
//! use signboard_core::{ContentUnit, Parameters, Source, SourceError, SourceFuture};
//!
//! struct Banner;
//!
//! impl Source for Banner {
//!     fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError> {
//!         parameters.require_str("text").map(|_| ())
//!     }
//!
//!     fn fetch<'a>(&'a self, parameters: &'a Parameters) -> SourceFuture<'a> {
//!         Box::pin(async move {
//!             let text = parameters.require_str("text")?;
//!             Ok(ContentUnit::from_lines([text]))
//!         })
//!     }
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ContentUnit;

/// Boxed future returned by [`Source::fetch`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<ContentUnit, SourceError>> + Send + 'a>>;

/// Provider contract.
///
/// Implementations must be `Send + Sync` because one instance is shared with
/// the task that runs its fetch. A fetch future may be dropped at any
/// `.await` when the instance timeout elapses.
pub trait Source: Send + Sync {
    /// Cheap, side-effect-free check of provider-specific parameters.
    fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError>;

    /// Performs the provider-specific work.
    fn fetch<'a>(&'a self, parameters: &'a Parameters) -> SourceFuture<'a>;

    /// Lets a provider decline emission of otherwise valid content.
    fn should_emit(&self, _content: &ContentUnit) -> bool {
        true
    }
}

/// Provider-specific settings of one source instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Returns a non-empty string parameter or a configuration error naming it.
    pub fn require_str(&self, key: &str) -> Result<&str, SourceError> {
        match self.0.get(key) {
            Some(Value::String(value)) if !value.trim().is_empty() => Ok(value),
            Some(Value::String(_)) => Err(SourceError::configuration(format!(
                "parameter '{key}' must not be empty"
            ))),
            Some(_) => Err(SourceError::configuration(format!(
                "parameter '{key}' must be a string"
            ))),
            None => Err(SourceError::configuration(format!(
                "missing required parameter '{key}'"
            ))),
        }
    }

    /// Returns a list of strings, or `None` when the key is absent.
    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>, SourceError> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        let Value::Array(items) = value else {
            return Err(SourceError::configuration(format!(
                "parameter '{key}' must be a list of strings"
            )));
        };

        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    SourceError::configuration(format!(
                        "parameter '{key}' must contain only strings"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidResponse,
    Configuration,
    Timeout,
    CircuitOpen,
    Internal,
}

/// Structured source error recorded in metrics and driving retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidResponse,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Configuration,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::CircuitOpen,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: true,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
            SourceErrorKind::Configuration => "source.configuration",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}
