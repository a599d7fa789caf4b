//! Import call types: options, results and failure reports

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Row, ValidationIssue};

/// Uploaded file as handed over by the UI shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Options forwarded to the import backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub auto_correct: bool,
    pub skip_invalid_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// Outcome of a successful or partially successful import call.
/// A retry produces a new result rather than mutating an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub id: Uuid,
    pub entity_type: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub issues: Vec<ValidationIssue>,
    pub timestamp: DateTime<Utc>,
}

impl ImportResult {
    pub fn new(entity_type: impl Into<String>, total: usize, success: usize, issues: Vec<ValidationIssue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            total,
            success,
            failed: total.saturating_sub(success),
            issues,
            timestamp: Utc::now(),
        }
    }

    /// Percentage of rows imported, 0 for an empty import
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success as f64 / self.total as f64 * 100.0
    }
}

/// Classification of an import failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Network,
    Server,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Transport-level failures that a plain retry may fix
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Server | ErrorKind::Timeout)
    }
}

/// Failure report produced by the import call's failure path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} ({processed_records}/{total_records} procesados, {failed_records} fallidos)")]
pub struct FailureReport {
    pub timestamp: DateTime<Utc>,
    pub entity_type: String,
    pub total_records: usize,
    pub processed_records: usize,
    pub failed_records: usize,
    pub error_kind: ErrorKind,
    pub message: String,
    /// `row_index` of the last row known to be imported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_good_row_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_rows: Option<Vec<Row>>,
}

impl FailureReport {
    pub fn new(entity_type: impl Into<String>, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_type: entity_type.into(),
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            error_kind,
            message: message.into(),
            last_good_row_index: None,
            failed_rows: None,
        }
    }

    pub fn with_counts(mut self, total: usize, processed: usize, failed: usize) -> Self {
        self.total_records = total;
        self.processed_records = processed;
        self.failed_records = failed;
        self
    }

    pub fn with_checkpoint(mut self, last_good_row_index: Option<usize>) -> Self {
        self.last_good_row_index = last_good_row_index;
        self
    }

    pub fn with_failed_rows(mut self, rows: Vec<Row>) -> Self {
        self.failed_rows = Some(rows);
        self
    }

    /// Failed rows, empty when the backend did not report them
    pub fn failed_rows(&self) -> &[Row] {
        self.failed_rows.as_deref().unwrap_or(&[])
    }
}

/// Derived statistics for the summary screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatistics {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub elapsed: Duration,
    /// Rows processed per second
    pub throughput: f64,
}

impl ImportStatistics {
    pub fn from_result(result: &ImportResult, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { result.total as f64 / secs } else { 0.0 };
        Self {
            total: result.total,
            success: result.success,
            failed: result.failed,
            success_rate: result.success_rate(),
            elapsed,
            throughput,
        }
    }
}
