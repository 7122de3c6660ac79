//! # Signboard Core
//!
//! Reliable, concurrent collection of display content from pluggable sources.
//!
//! ## Overview
//!
//! - **Source contract** every provider implements
//! - **Registry** mapping type names in configuration to constructors
//! - **Configuration loader** with all-or-nothing validation
//! - **Reliability wrapper**: timeout, retry, circuit breaker, cached fallback
//! - **Execution engine** running a batch of instances concurrently with
//!   per-instance isolation and NDJSON metrics
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Last-known-good content per instance |
//! | [`circuit_breaker`] | Per-instance circuit breaker and its book |
//! | [`config`] | Configuration document model and loader |
//! | [`content`] | Renderable content unit |
//! | [`domain`] | UTC timestamp type |
//! | [`engine`] | Batch execution engine and builder |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`logging`] | Console tracing setup |
//! | [`metrics`] | Execution metrics and the metrics log |
//! | [`providers`] | Built-in provider types |
//! | [`registry`] | Source type registry |
//! | [`reliability`] | Reliability wrapper around one execution |
//! | [`retry`] | Retry policy and backoff |
//! | [`source`] | Source contract, parameters, and errors |
//! | [`state`] | On-disk state directory |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use signboard_core::{init_tracing, EngineBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_tracing();
//!     let engine = EngineBuilder::from_env()?.build();
//!     let config = engine.config_loader().load_path("sources.yaml")?;
//!
//!     let report = engine.run(&config).await?;
//!     for result in &report.results {
//!         match &result.content {
//!             Some(content) => println!("{}: {} lines", result.source_id, content.lines.len()),
//!             None => println!("{}: no content", result.source_id),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Config Loader    │────▶│ Source Registry  │
//! └────────┬─────────┘     └────────┬─────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Execution Engine │────▶│ Reliability      │
//! │ (task per source)│     │ Guard            │
//! └────────┬─────────┘     └────────┬─────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Metrics Log      │     │ Circuit Book +   │
//! │ (NDJSON)         │     │ Fallback Cache   │
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Configuration problems fail the whole load. Provider failures never
//! escape the engine; they show up as a `None` content result and a failed
//! metrics record:
//!
//! ```rust
//! use signboard_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited | SourceErrorKind::Unavailable => "try again later",
//!         SourceErrorKind::Configuration => "fix the configuration",
//!         _ => "see metrics",
//!     }
//! }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod content;
pub mod domain;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod reliability;
pub mod retry;
pub mod source;
pub mod state;

// Caching
pub use cache::{CacheEntry, FallbackCache};

// Circuit breaker
pub use circuit_breaker::{Admission, CircuitBook, CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Configuration
pub use config::{
    ConfigError, ConfigIssue, ConfigLoader, EnvLookup, FallbackPolicy, SourceInstanceConfig,
    SourcesConfig,
};

// Content and domain
pub use content::ContentUnit;
pub use domain::UtcDateTime;

// Engine
pub use engine::{BatchReport, EngineBuilder, EngineError, ExecutionEngine, SourceResult};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Logging
pub use logging::init_tracing;

// Metrics
pub use metrics::{ErrorCategory, ExecutionMetrics, ExecutionOutcome, MetricsLog};

// Registry
pub use registry::{RegistryError, SourceConstructor, SourceRegistry};

// Reliability
pub use reliability::{ReliabilityGuard, Settlement};

// Retry logic
pub use retry::{Backoff, RetryPolicy};

// Source contract
pub use source::{Parameters, Source, SourceError, SourceErrorKind, SourceFuture};

// State
pub use state::{StateDir, StateError};
