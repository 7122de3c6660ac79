//! On-disk layout for per-instance reliability state.
//!
//! ```text
//! <state_dir>/
//!   cache/<source_id>.json      last-known-good content
//!   circuit/<source_id>.json    circuit breaker snapshot
//! ```
//!
//! Every file belongs to exactly one source instance, so writers never
//! contend across instances. Writes go through a temp file and a rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state for '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Kind of per-instance state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateKind {
    Cache,
    Circuit,
}

impl StateKind {
    const fn dir_name(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Circuit => "circuit",
        }
    }
}

/// Root directory holding per-instance state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn file_for(&self, kind: StateKind, source_id: &str) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(format!("{source_id}.json"))
    }

    /// Reads a state file; a missing file is `Ok(None)`.
    pub(crate) async fn read<T: DeserializeOwned>(
        &self,
        kind: StateKind,
        source_id: &str,
    ) -> Result<Option<T>, StateError> {
        let path = self.file_for(kind, source_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Corrupt { path, source })
    }

    pub(crate) async fn write<T: Serialize>(
        &self,
        kind: StateKind,
        source_id: &str,
        value: &T,
    ) -> Result<(), StateError> {
        let path = self.file_for(kind, source_id);
        let payload = serde_json::to_vec_pretty(value).map_err(|source| StateError::Encode {
            path: path.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StateError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &payload)
            .await
            .map_err(|source| StateError::Io {
                path: temp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|source| StateError::Io { path, source })
    }
}
