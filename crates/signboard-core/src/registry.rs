//! Static mapping from source type names to constructors.
//!
//! The registry is populated once at process start from an explicit list of
//! provider constructors and is shared read-only afterwards.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::providers;
use crate::source::{Parameters, Source};

/// Builds one source instance from its id and parameters. Must not perform I/O.
pub type SourceConstructor = Arc<dyn Fn(&str, &Parameters) -> Arc<dyn Source> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source type '{type_name}' is already registered")]
    DuplicateType { type_name: String },

    #[error("unknown source type '{type_name}'; known types: [{}]", .known.join(", "))]
    UnknownSourceType {
        type_name: String,
        known: Vec<String>,
    },
}

/// Type-name to constructor map.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    constructors: BTreeMap<String, SourceConstructor>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in provider type.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        for (type_name, constructor) in providers::builtin_constructors() {
            let registered = registry.register(type_name, constructor);
            debug_assert!(
                registered.is_ok(),
                "built-in source type '{type_name}' registered twice"
            );
        }
        registry
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        constructor: SourceConstructor,
    ) -> Result<(), RegistryError> {
        let type_name = type_name.into();
        if self.constructors.contains_key(&type_name) {
            return Err(RegistryError::DuplicateType { type_name });
        }
        self.constructors.insert(type_name, constructor);
        Ok(())
    }

    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        constructor: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&str, &Parameters) -> Arc<dyn Source> + Send + Sync + 'static,
    {
        self.register(type_name, Arc::new(constructor))
    }

    pub fn create(
        &self,
        type_name: &str,
        source_id: &str,
        parameters: &Parameters,
    ) -> Result<Arc<dyn Source>, RegistryError> {
        let constructor = self.constructors.get(type_name).ok_or_else(|| self.unknown(type_name))?;
        Ok(constructor(source_id, parameters))
    }

    /// Fails with [`RegistryError::UnknownSourceType`] when `type_name` is absent.
    pub fn ensure_known(&self, type_name: &str) -> Result<(), RegistryError> {
        if self.contains(type_name) {
            Ok(())
        } else {
            Err(self.unknown(type_name))
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names in sorted order.
    pub fn list_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    fn unknown(&self, type_name: &str) -> RegistryError {
        RegistryError::UnknownSourceType {
            type_name: type_name.to_owned(),
            known: self.constructors.keys().cloned().collect(),
        }
    }
}

impl Debug for SourceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}
