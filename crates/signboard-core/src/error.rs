use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::metrics::MetricsError;
use crate::registry::RegistryError;
use crate::state::StateError;

/// Validation errors for primitive values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
