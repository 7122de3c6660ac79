//! Contract checks every registered source type must satisfy.

use std::sync::Arc;

use serde_json::json;
use signboard_core::{
    ContentUnit, Parameters, Source, SourceError, SourceErrorKind, SourceFuture, SourceRegistry,
};

struct Countdown;

impl Source for Countdown {
    fn validate_configuration(&self, parameters: &Parameters) -> Result<(), SourceError> {
        parameters.require_str("event")?;
        match parameters.get("days") {
            Some(days) if days.is_u64() => Ok(()),
            _ => Err(SourceError::configuration("'days' must be a whole number")),
        }
    }

    fn fetch<'a>(&'a self, parameters: &'a Parameters) -> SourceFuture<'a> {
        Box::pin(async move {
            let event = parameters.require_str("event")?;
            let days = parameters
                .get("days")
                .and_then(|days| days.as_u64())
                .ok_or_else(|| SourceError::configuration("'days' must be a whole number"))?;
            Ok(ContentUnit::from_lines([format!("{days} days until {event}")]))
        })
    }
}

fn registry() -> SourceRegistry {
    let mut registry = SourceRegistry::with_builtin_providers();
    registry
        .register_fn("countdown", |_, _| Arc::new(Countdown) as Arc<dyn Source>)
        .expect("countdown registers once");
    registry
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn every_registered_type_rejects_empty_parameters_as_configuration_errors() {
    // Given: the built-in providers plus one custom provider
    let registry = registry();

    for type_name in registry.list_types() {
        // When: an instance validates an empty parameter map
        let source = registry
            .create(type_name, "contract_probe", &Parameters::new())
            .expect("registered type constructs");
        let error = source
            .validate_configuration(&Parameters::new())
            .expect_err("empty parameters are never valid");

        // Then: the failure is classified as configuration, never retried
        assert_eq!(error.kind(), SourceErrorKind::Configuration, "{type_name}");
        assert!(!error.retryable(), "{type_name}");
    }
}

#[test]
fn construction_performs_no_validation() {
    // Given: parameters that no provider accepts
    let registry = registry();
    let nonsense = Parameters::new().with("unexpected", json!({"deeply": ["nested"]}));

    // When/Then: construction still succeeds for every type
    for type_name in registry.list_types() {
        assert!(registry.create(type_name, "probe", &nonsense).is_ok());
    }
}

#[tokio::test]
async fn fetch_futures_are_send_and_produce_content() {
    // Given: a custom provider with valid parameters
    let registry = registry();
    let parameters = Parameters::new()
        .with("event", "launch")
        .with("days", 3);
    let source = registry
        .create("countdown", "launch_countdown", &parameters)
        .expect("constructs");
    source
        .validate_configuration(&parameters)
        .expect("valid parameters");

    // When: the fetch future is awaited
    let future = source.fetch(&parameters);
    assert_send(&future);
    let content = future.await.expect("content");

    // Then: content is produced and emitted by default
    assert_eq!(content.lines, vec!["3 days until launch"]);
    assert!(source.should_emit(&content));
}

#[test]
fn unknown_type_names_every_registered_type() {
    // Given: a registry with three types
    let registry = registry();

    // When: an unregistered type is requested
    let error = match registry.create("stock_ticker", "stocks", &Parameters::new()) {
        Ok(_) => panic!("unknown type must not construct"),
        Err(error) => error,
    };

    // Then: the message lists every known type
    let message = error.to_string();
    for type_name in ["countdown", "http_json", "static_text"] {
        assert!(message.contains(type_name), "{message}");
    }
}
