use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::registry::SourceRegistry;
use crate::source::Parameters;

use super::env::{resolve_value, EnvLookup, ProcessEnv};
use super::error::ConfigError;
use super::model::{RawDocument, SourcesConfig};
use super::validate::{check_collection, convert_raw};

/// Parses and validates source configuration documents against a registry.
pub struct ConfigLoader<'r> {
    registry: &'r SourceRegistry,
    env: Arc<dyn EnvLookup>,
}

impl<'r> ConfigLoader<'r> {
    /// Loader resolving placeholders from the process environment.
    pub fn new(registry: &'r SourceRegistry) -> Self {
        Self {
            registry,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Replaces the environment used for `${NAME}` resolution.
    pub fn with_env(mut self, env: impl EnvLookup + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<SourcesConfig, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading source configuration");
        self.load_str(&document)
    }

    /// Like [`ConfigLoader::load_path`], but a missing file yields `Ok(None)`.
    pub fn load_optional(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<SourcesConfig>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no source configuration found");
            return Ok(None);
        }
        self.load_path(path).map(Some)
    }

    pub fn load_str(&self, document: &str) -> Result<SourcesConfig, ConfigError> {
        let raw: RawDocument = serde_yaml::from_str(document)?;

        let mut issues = Vec::new();
        let mut instances = Vec::with_capacity(raw.sources.len());
        for (index, source) in raw.sources.into_iter().enumerate() {
            instances.push(convert_raw(index, source, &mut issues));
        }
        if !issues.is_empty() {
            return Err(ConfigError::Invalid { issues });
        }

        check_collection(&instances, self.registry)?;

        let mut references = Vec::new();
        for instance in &mut instances {
            let mut value = Value::Object(std::mem::take(&mut instance.parameters).into_map());
            let mut missing = Vec::new();
            resolve_value(&mut value, self.env.as_ref(), &mut missing);
            references.extend(
                missing
                    .into_iter()
                    .map(|name| format!("{}: ${{{name}}}", instance.id)),
            );
            if let Value::Object(map) = value {
                instance.parameters = Parameters::from_map(map);
            }
        }
        if !references.is_empty() {
            return Err(ConfigError::UnresolvedEnvironment { references });
        }

        tracing::debug!(
            sources = instances.len(),
            enabled = instances.iter().filter(|source| source.enabled).count(),
            "source configuration validated"
        );
        Ok(SourcesConfig::from_validated(instances))
    }
}
