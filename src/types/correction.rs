//! Pending correction decisions

use serde::{Deserialize, Serialize};

use super::ScalarValue;

/// One pending edit/skip/delete decision, not yet committed to the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CorrectionAction {
    #[serde(rename_all = "camelCase")]
    Edit {
        row: usize,
        field: String,
        new_value: ScalarValue,
    },
    Delete { row: usize },
    Skip { row: usize },
}

impl CorrectionAction {
    pub fn edit(row: usize, field: impl Into<String>, new_value: impl Into<ScalarValue>) -> Self {
        CorrectionAction::Edit {
            row,
            field: field.into(),
            new_value: new_value.into(),
        }
    }

    /// Row the action applies to
    pub fn row(&self) -> usize {
        match self {
            CorrectionAction::Edit { row, .. }
            | CorrectionAction::Delete { row }
            | CorrectionAction::Skip { row } => *row,
        }
    }

    /// True for `Delete` and `Skip`
    pub fn excludes_row(&self) -> bool {
        !matches!(self, CorrectionAction::Edit { .. })
    }

    /// Whether `other` replaces this action when issued later
    pub fn is_superseded_by(&self, other: &CorrectionAction) -> bool {
        match (self, other) {
            (
                CorrectionAction::Edit { row: a, field: fa, .. },
                CorrectionAction::Edit { row: b, field: fb, .. },
            ) => a == b && fa == fb,
            (a, b) => a.excludes_row() && b.excludes_row() && a.row() == b.row(),
        }
    }
}
