//! Execution metrics and the append-only NDJSON metrics log.
//!
//! One [`ExecutionMetrics`] record is produced per attempted execution of
//! one source instance. A finished batch is appended to the log as one
//! line per record:
//!
//! ```text
//! {"source_id":"weather_home","source_type":"weather","started_at":"...","success":true,...}
//! {"source_id":"ferry_default","source_type":"ferry","success":false,"error_kind":"fetch",...}
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::{SourceError, SourceErrorKind};
use crate::UtcDateTime;

/// Error category recorded for a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Fetch,
    Timeout,
    CircuitOpen,
    Configuration,
    Internal,
}

impl From<SourceErrorKind> for ErrorCategory {
    fn from(kind: SourceErrorKind) -> Self {
        match kind {
            SourceErrorKind::Unavailable
            | SourceErrorKind::RateLimited
            | SourceErrorKind::InvalidResponse => Self::Fetch,
            SourceErrorKind::Timeout => Self::Timeout,
            SourceErrorKind::CircuitOpen => Self::CircuitOpen,
            SourceErrorKind::Configuration => Self::Configuration,
            SourceErrorKind::Internal => Self::Internal,
        }
    }
}

/// Finalized record of one execution. Never mutated after [`MetricsRecorder::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub source_id: String,
    pub source_type: String,
    pub started_at: UtcDateTime,
    pub completed_at: UtcDateTime,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorCategory>,
    pub duration_seconds: f64,
    pub data_points: usize,
    /// Content was served from the fallback cache after a live failure.
    #[serde(default)]
    pub fallback: bool,
    /// The source declined to emit otherwise valid content.
    #[serde(default)]
    pub suppressed: bool,
}

impl ExecutionMetrics {
    pub fn is_live_success(&self) -> bool {
        self.success && !self.fallback
    }
}

/// In-flight metrics for one execution, created when it begins.
#[derive(Debug)]
pub struct MetricsRecorder {
    source_id: String,
    source_type: String,
    started_at: UtcDateTime,
    started: Instant,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Live { data_points: usize },
    Suppressed,
    Fallback { data_points: usize, error: SourceError },
    Failed { error: SourceError },
}

impl MetricsRecorder {
    pub fn start(source_id: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: source_type.into(),
            started_at: UtcDateTime::now(),
            started: Instant::now(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn finish(self, outcome: &ExecutionOutcome) -> ExecutionMetrics {
        let (success, data_points, error, fallback, suppressed) = match outcome {
            ExecutionOutcome::Live { data_points } => (true, *data_points, None, false, false),
            ExecutionOutcome::Suppressed => (true, 0, None, false, true),
            ExecutionOutcome::Fallback { data_points, error } => {
                (true, *data_points, Some(error), true, false)
            }
            ExecutionOutcome::Failed { error } => (false, 0, Some(error), false, false),
        };

        ExecutionMetrics {
            source_id: self.source_id,
            source_type: self.source_type,
            started_at: self.started_at,
            completed_at: UtcDateTime::now(),
            success,
            error: error.map(|error| error.message().to_owned()),
            error_kind: error.map(|error| ErrorCategory::from(error.kind())),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            data_points,
            fallback,
            suppressed,
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("metrics log I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metrics record at line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes metrics records as newline-delimited JSON.
pub struct NdjsonMetricsWriter<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> NdjsonMetricsWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn write_record(&mut self, record: &ExecutionMetrics) -> Result<(), std::io::Error> {
        let payload = serde_json::to_string(record).map_err(std::io::Error::other)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Append-only metrics log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsLog {
    path: PathBuf,
}

impl MetricsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one batch of records in a single buffered write.
    pub async fn append_batch(&self, records: &[ExecutionMetrics]) -> Result<(), MetricsError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut writer = NdjsonMetricsWriter::new(Vec::new());
        for record in records {
            writer.write_record(record).map_err(|source| self.io_error(source))?;
        }
        let buffer = writer.into_inner();

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &buffer)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .map_err(|source| self.io_error(source))
    }

    /// Reads every record in the log; a missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<ExecutionMetrics>, MetricsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => parse_metrics_log(&contents),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> MetricsError {
        MetricsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parses NDJSON metrics, skipping blank lines.
pub fn parse_metrics_log(input: &str) -> Result<Vec<ExecutionMetrics>, MetricsError> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| MetricsError::Malformed {
                line: index + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_outcome_is_success_with_distinct_flag() {
        let recorder = MetricsRecorder::start("weather_home", "weather");
        let metrics = recorder.finish(&ExecutionOutcome::Fallback {
            data_points: 4,
            error: SourceError::unavailable("HTTP 503"),
        });

        assert!(metrics.success);
        assert!(metrics.fallback);
        assert!(!metrics.is_live_success());
        assert_eq!(metrics.data_points, 4);
        assert_eq!(metrics.error.as_deref(), Some("HTTP 503"));
        assert_eq!(metrics.error_kind, Some(ErrorCategory::Fetch));
        assert!(metrics.completed_at >= metrics.started_at);
    }

    #[test]
    fn timeout_outcome_records_timeout_category() {
        let metrics = MetricsRecorder::start("ferry", "ferry").finish(&ExecutionOutcome::Failed {
            error: SourceError::timeout("timed out after 30s"),
        });

        assert!(!metrics.success);
        assert_eq!(metrics.error_kind, Some(ErrorCategory::Timeout));
        assert_eq!(metrics.data_points, 0);
    }

    #[test]
    fn writer_emits_one_line_per_record() {
        let mut writer = NdjsonMetricsWriter::new(Vec::new());
        let record = MetricsRecorder::start("stock", "stock")
            .finish(&ExecutionOutcome::Live { data_points: 3 });

        writer.write_record(&record).expect("write");
        writer.write_record(&record).expect("write");
        assert_eq!(writer.written(), 2);

        let output = String::from_utf8(writer.into_inner()).expect("utf8");
        let parsed = parse_metrics_log(&output).expect("parse");
        assert_eq!(parsed, vec![record.clone(), record]);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let error = parse_metrics_log("\n{oops}\n").expect_err("malformed");
        assert!(matches!(error, MetricsError::Malformed { line: 2, .. }));
    }

    #[tokio::test]
    async fn append_batch_preserves_earlier_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = MetricsLog::new(dir.path().join("logs").join("metrics.ndjson"));

        let first = MetricsRecorder::start("a", "static_text")
            .finish(&ExecutionOutcome::Live { data_points: 1 });
        let second = MetricsRecorder::start("b", "static_text").finish(&ExecutionOutcome::Failed {
            error: SourceError::circuit_open("circuit open"),
        });

        log.append_batch(std::slice::from_ref(&first)).await.expect("append");
        log.append_batch(std::slice::from_ref(&second)).await.expect("append");

        let records = log.read_all().await.expect("read");
        assert_eq!(records, vec![first, second]);
    }
}
