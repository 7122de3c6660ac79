use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::RegistryError;

/// One structural problem found in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub index: usize,
    pub source_id: Option<String>,
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    pub(crate) fn new(
        index: usize,
        source_id: &str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            source_id: (!source_id.is_empty()).then(|| source_id.to_owned()),
            field,
            message: message.into(),
        }
    }
}

impl Display for ConfigIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.source_id {
            Some(id) => write!(
                f,
                "sources[{}] ({id}): {}: {}",
                self.index, self.field, self.message
            ),
            None => write!(f, "sources[{}]: {}: {}", self.index, self.field, self.message),
        }
    }
}

/// Load-time configuration failure. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", join_issues(.issues))]
    Invalid { issues: Vec<ConfigIssue> },

    #[error("duplicate source ids: {}", .ids.join(", "))]
    DuplicateIds { ids: Vec<String> },

    #[error("source '{source_id}': {source}")]
    UnknownSourceType {
        source_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("unresolved environment variables: {}", .references.join(", "))]
    UnresolvedEnvironment { references: Vec<String> },
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
