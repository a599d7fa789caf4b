//! Validation findings

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ScalarValue;

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Single validation finding tied to a row and field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// `row_index` of the row the issue was raised on
    pub row: usize,
    pub field: String,
    pub value: ScalarValue,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Earlier row this one duplicates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_row: Option<usize>,
}

impl ValidationIssue {
    pub fn new(
        row: usize,
        field: impl Into<String>,
        value: ScalarValue,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            field: field.into(),
            value,
            message: message.into(),
            severity,
            suggestion: None,
            related_row: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Aggregate counts over one validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub rows_with_errors: usize,
    pub rows_with_warnings: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub total_infos: usize,
    pub duplicated_row_indices: Vec<usize>,
    /// Required fields missing in at least one row
    pub missing_required_fields: BTreeSet<String>,
    pub invalid_type_fields: BTreeSet<String>,
}

impl ValidationSummary {
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }
}
