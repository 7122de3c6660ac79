//! Renderable payload produced by a source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque content handed to the rendering pipeline.
///
/// The engine never inspects the payload beyond [`ContentUnit::data_points`],
/// which feeds the execution metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ContentUnit {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            layout: None,
            metadata: Map::new(),
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(Into::into).collect())
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Number of produced data units, recorded in execution metrics.
    pub fn data_points(&self) -> usize {
        self.lines.len()
    }
}
