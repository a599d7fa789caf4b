//! Correction engine
//!
//! Applies pending correction actions to a row set (copy-on-write) and
//! proposes rule-based auto-fixes for validation issues.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::services::validation::phone_digits;
use crate::types::{
    parse_local_date, ColumnRule, ColumnType, CorrectionAction, Row, ScalarValue, ValidationIssue,
};

/// Proposes a corrected value, or `None` when the heuristic does not apply
pub trait Fixer: Send + Sync {
    fn fix(&self, value: &ScalarValue) -> Option<ScalarValue>;
}

impl<F> Fixer for F
where
    F: Fn(&ScalarValue) -> Option<ScalarValue> + Send + Sync,
{
    fn fix(&self, value: &ScalarValue) -> Option<ScalarValue> {
        self(value)
    }
}

/// Trim and lowercase when the value holds exactly one `@` and no inner whitespace
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailFixer;

impl Fixer for EmailFixer {
    fn fix(&self, value: &ScalarValue) -> Option<ScalarValue> {
        let raw = value.as_text()?;
        let trimmed = raw.trim();
        if trimmed.matches('@').count() != 1 || trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        let fixed = trimmed.to_lowercase();
        (fixed != raw).then(|| ScalarValue::Text(fixed))
    }
}

/// Strip everything but digits when at least `min_digits` remain
#[derive(Debug, Clone, Copy)]
pub struct PhoneFixer {
    pub min_digits: usize,
}

impl Fixer for PhoneFixer {
    fn fix(&self, value: &ScalarValue) -> Option<ScalarValue> {
        let raw = value.to_string();
        let digits = phone_digits(&raw);
        if digits.len() < self.min_digits || digits == raw {
            return None;
        }
        Some(ScalarValue::Text(digits))
    }
}

/// Rewrite `DD/MM/YYYY` (and the other local formats) as ISO `YYYY-MM-DD`
#[derive(Debug, Clone, Copy, Default)]
pub struct DateFixer;

impl Fixer for DateFixer {
    fn fix(&self, value: &ScalarValue) -> Option<ScalarValue> {
        let date = parse_local_date(value.as_text()?)?;
        Some(ScalarValue::Text(date.format("%Y-%m-%d").to_string()))
    }
}

/// Fixers keyed by field, with column-type fallbacks
#[derive(Clone, Default)]
pub struct FixerRegistry {
    by_field: HashMap<String, Arc<dyn Fixer>>,
    by_type: HashMap<ColumnType, Arc<dyn Fixer>>,
}

impl FixerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, fixer: impl Fixer + 'static) -> Self {
        self.by_field.insert(field.into(), Arc::new(fixer));
        self
    }

    pub fn with_type(mut self, column_type: ColumnType, fixer: impl Fixer + 'static) -> Self {
        self.by_type.insert(column_type, Arc::new(fixer));
        self
    }

    /// Field-specific fixer first, then the one for the column's type
    pub fn lookup(&self, field: &str, column_type: Option<ColumnType>) -> Option<&Arc<dyn Fixer>> {
        self.by_field
            .get(field)
            .or_else(|| column_type.and_then(|t| self.by_type.get(&t)))
    }
}

impl std::fmt::Debug for FixerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<_> = self.by_field.keys().collect();
        fields.sort();
        f.debug_struct("FixerRegistry")
            .field("fields", &fields)
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Effective decision per row after reducing an action list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionPlan {
    /// Last edit per `(row, field)`
    pub edits: BTreeMap<(usize, String), ScalarValue>,
    /// Rows removed by `Delete` or `Skip`, with the action that won
    pub excluded: BTreeMap<usize, CorrectionAction>,
}

impl CorrectionPlan {
    pub fn from_actions(actions: &[CorrectionAction]) -> Self {
        let mut plan = Self::default();
        for action in actions {
            plan.push(action.clone());
        }
        plan
    }

    pub fn push(&mut self, action: CorrectionAction) {
        match action {
            CorrectionAction::Edit { row, field, new_value } => {
                self.edits.insert((row, field), new_value);
            }
            other => {
                self.excluded.insert(other.row(), other);
            }
        }
    }

    pub fn is_excluded(&self, row: usize) -> bool {
        self.excluded.contains_key(&row)
    }

    /// Normalized action list: one entry per `(row, field)` edit and per excluded row
    pub fn to_actions(&self) -> Vec<CorrectionAction> {
        let edits = self.edits.iter().map(|((row, field), value)| CorrectionAction::Edit {
            row: *row,
            field: field.clone(),
            new_value: value.clone(),
        });
        edits.chain(self.excluded.values().cloned()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrectionEngine {
    fixers: FixerRegistry,
    column_types: HashMap<String, ColumnType>,
}

impl CorrectionEngine {
    pub fn new(fixers: FixerRegistry) -> Self {
        Self {
            fixers,
            column_types: HashMap::new(),
        }
    }

    /// Engine aware of the column types, for type-keyed fixers
    pub fn for_columns(fixers: FixerRegistry, rules: &[ColumnRule]) -> Self {
        Self {
            fixers,
            column_types: rules.iter().map(|r| (r.key.clone(), r.column_type)).collect(),
        }
    }

    /// Apply `actions` to `rows`, returning new rows in input order.
    ///
    /// Later edits to the same `(row, field)` replace earlier ones. A row with
    /// any `Delete` or `Skip` is dropped, whatever edits it has.
    pub fn apply_corrections(&self, rows: &[Row], actions: &[CorrectionAction]) -> Vec<Row> {
        let plan = CorrectionPlan::from_actions(actions);
        self.apply_plan(rows, &plan)
    }

    pub fn apply_plan(&self, rows: &[Row], plan: &CorrectionPlan) -> Vec<Row> {
        let mut edited = 0usize;
        let output: Vec<Row> = rows
            .iter()
            .filter(|row| !plan.is_excluded(row.row_index))
            .map(|row| {
                let mut changes = plan
                    .edits
                    .range((row.row_index, String::new())..)
                    .take_while(|((r, _), _)| *r == row.row_index)
                    .peekable();
                if changes.peek().is_none() {
                    return row.clone();
                }
                let mut updated = row.clone();
                for ((_, field), value) in changes {
                    updated.set(field.clone(), value.clone());
                }
                updated.clear_bookkeeping();
                edited += 1;
                updated
            })
            .collect();

        debug!(
            "Applied corrections: {} rows edited, {} rows excluded, {} rows remain",
            edited,
            rows.len() - output.len(),
            output.len()
        );
        output
    }

    /// Propose `Edit` actions for issues a registered fixer can resolve.
    /// Pure: nothing is applied.
    pub fn auto_fix(&self, rows: &[Row], issues: &[ValidationIssue]) -> Vec<CorrectionAction> {
        let by_index: HashMap<usize, &Row> = rows.iter().map(|r| (r.row_index, r)).collect();
        let mut proposed = HashSet::new();
        let mut actions = Vec::new();

        for issue in issues {
            if !proposed.insert((issue.row, issue.field.as_str())) {
                continue;
            }
            let Some(row) = by_index.get(&issue.row) else {
                continue;
            };
            let column_type = self.column_types.get(&issue.field).copied();
            let Some(fixer) = self.fixers.lookup(&issue.field, column_type) else {
                continue;
            };
            let current = row.get(&issue.field);
            if let Some(fixed) = fixer.fix(current) {
                if &fixed != current {
                    actions.push(CorrectionAction::Edit {
                        row: issue.row,
                        field: issue.field.clone(),
                        new_value: fixed,
                    });
                }
            }
        }

        debug!("Auto-fix proposed {} edits for {} issues", actions.len(), issues.len());
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    fn engine() -> CorrectionEngine {
        let rules = vec![
            ColumnRule::new("email", "Email", ColumnType::Text),
            ColumnRule::new("telefono", "Teléfono", ColumnType::Text),
            ColumnRule::new("fecha_alta", "Fecha de alta", ColumnType::Date),
        ];
        let fixers = FixerRegistry::new()
            .with_field("email", EmailFixer)
            .with_field("telefono", PhoneFixer { min_digits: 9 })
            .with_type(ColumnType::Date, DateFixer);
        CorrectionEngine::for_columns(fixers, &rules)
    }

    fn issue(row: usize, field: &str, value: &str) -> ValidationIssue {
        ValidationIssue::new(row, field, ScalarValue::text(value), Severity::Error, "x")
    }

    #[test]
    fn test_last_edit_for_same_pair_wins() {
        let rows = vec![Row::new(1).with("email", "x")];
        let actions = vec![CorrectionAction::edit(1, "email", "a"), CorrectionAction::edit(1, "email", "b")];
        let out = engine().apply_corrections(&rows, &actions);
        assert_eq!(out[0].get("email"), &ScalarValue::text("b"));
    }

    #[test]
    fn test_skip_after_edit_excludes_row() {
        let rows = vec![Row::new(1).with("x", "1"), Row::new(2).with("x", "2"), Row::new(3).with("x", "3")];
        let actions = vec![CorrectionAction::edit(2, "x", "20"), CorrectionAction::Skip { row: 2 }];
        let out = engine().apply_corrections(&rows, &actions);
        let indices: Vec<usize> = out.iter().map(|r| r.row_index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn test_edit_after_delete_still_excludes_row() {
        let rows = vec![Row::new(1).with("x", "1"), Row::new(2).with("x", "2")];
        let actions = vec![CorrectionAction::Delete { row: 1 }, CorrectionAction::edit(1, "x", "10")];
        let out = engine().apply_corrections(&rows, &actions);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].row_index, 2);
    }

    #[test]
    fn test_apply_is_copy_on_write_and_keeps_order() {
        let mut original = Row::new(2).with("email", "OLD");
        original.has_errors = true;
        let rows = vec![Row::new(1).with("email", "a@b.com"), original.clone(), Row::new(3)];
        let out = engine().apply_corrections(&rows, &[CorrectionAction::edit(2, "email", "new@b.com")]);

        assert_eq!(rows[1], original);
        assert_eq!(out.iter().map(|r| r.row_index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(out[1].get("email"), &ScalarValue::text("new@b.com"));
        assert!(!out[1].has_errors);
    }

    #[test]
    fn test_no_actions_returns_same_rows() {
        let rows = vec![Row::new(1).with("email", "bad")];
        assert_eq!(engine().apply_corrections(&rows, &[]), rows);
    }

    #[test]
    fn test_plan_normalizes_actions() {
        let plan = CorrectionPlan::from_actions(&[
            CorrectionAction::edit(1, "email", "a"),
            CorrectionAction::Skip { row: 4 },
            CorrectionAction::edit(1, "email", "b"),
            CorrectionAction::Delete { row: 4 },
        ]);
        assert_eq!(
            plan.to_actions(),
            vec![CorrectionAction::edit(1, "email", "b"), CorrectionAction::Delete { row: 4 }]
        );
    }

    #[test]
    fn test_auto_fix_email_phone_and_date() {
        let rows = vec![
            Row::new(1)
                .with("email", "  Juan@Example.COM ")
                .with("telefono", "+34 600-123-123")
                .with("fecha_alta", "05/11/2023"),
        ];
        let issues = vec![
            issue(1, "email", "  Juan@Example.COM "),
            issue(1, "telefono", "+34 600-123-123"),
            issue(1, "fecha_alta", "05/11/2023"),
        ];
        let actions = engine().auto_fix(&rows, &issues);
        assert_eq!(
            actions,
            vec![
                CorrectionAction::edit(1, "email", "juan@example.com"),
                CorrectionAction::edit(1, "telefono", "34600123123"),
                CorrectionAction::edit(1, "fecha_alta", "2023-11-05"),
            ]
        );
    }

    #[test]
    fn test_auto_fix_skips_when_heuristic_does_not_apply() {
        let rows = vec![
            Row::new(1).with("email", "bad"),
            Row::new(2).with("telefono", "12-34"),
            Row::new(3).with("notas", "x"),
        ];
        let issues = vec![issue(1, "email", "bad"), issue(2, "telefono", "12-34"), issue(3, "notas", "x")];
        assert!(engine().auto_fix(&rows, &issues).is_empty());
    }

    #[test]
    fn test_auto_fix_proposes_one_edit_per_pair() {
        let rows = vec![Row::new(1).with("email", "A@B.COM")];
        let issues = vec![issue(1, "email", "A@B.COM"), issue(1, "email", "A@B.COM")];
        assert_eq!(engine().auto_fix(&rows, &issues).len(), 1);
    }
}
