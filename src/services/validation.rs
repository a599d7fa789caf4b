//! Row validation engine
//!
//! Maps a row set plus column rules to typed issues and a summary. The pass
//! is read-only and deterministic: issues come out row-major, then in column
//! declaration order, with the duplicate check last for each row.
//!
//! Field-specific checks (email shape, phone length, ...) are not hard-coded;
//! they are registered per field key in a `ValidatorRegistry`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::RuleError;
use crate::types::{
    parse_iso_date, parse_local_date, ColumnRule, ColumnType, Row, ScalarValue, Severity,
    ValidationIssue, ValidationSummary,
};

/// Field used for row-level issues such as duplicates
pub const ROW_FIELD: &str = "*";

/// Finding returned by a field validator
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFinding {
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
}

impl FieldFinding {
    pub fn error(message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, message: message.into(), suggestion: None }
    }

    pub fn warning(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self { severity: Severity::Warning, message: message.into(), suggestion }
    }
}

/// Pluggable per-field check, run on non-empty values that passed the type check
pub trait FieldValidator: Send + Sync {
    fn check(&self, value: &ScalarValue) -> Option<FieldFinding>;
}

impl<F> FieldValidator for F
where
    F: Fn(&ScalarValue) -> Option<FieldFinding> + Send + Sync,
{
    fn check(&self, value: &ScalarValue) -> Option<FieldFinding> {
        self(value)
    }
}

/// Email shape: exactly one `@`, no whitespace, non-empty local part, dotted domain
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailValidator;

impl FieldValidator for EmailValidator {
    fn check(&self, value: &ScalarValue) -> Option<FieldFinding> {
        let raw = value.to_string();
        match normalize_email(&raw) {
            None => Some(FieldFinding::error(format!("Formato de email inválido: '{}'", raw))),
            Some(normalized) if normalized != raw => Some(FieldFinding::warning(
                "El email contiene mayúsculas o espacios",
                Some(normalized),
            )),
            Some(_) => None,
        }
    }
}

/// Phone numbers need at least `min_digits` digits
#[derive(Debug, Clone, Copy)]
pub struct PhoneValidator {
    pub min_digits: usize,
}

impl FieldValidator for PhoneValidator {
    fn check(&self, value: &ScalarValue) -> Option<FieldFinding> {
        let raw = value.to_string();
        let digits = phone_digits(&raw);
        if digits.len() < self.min_digits {
            return Some(FieldFinding::error(format!(
                "Teléfono inválido: se requieren al menos {} dígitos",
                self.min_digits
            )));
        }
        if raw.trim() != digits {
            return Some(FieldFinding::warning("El teléfono contiene caracteres no numéricos", Some(digits)));
        }
        None
    }
}

/// Trimmed, lowercased email when the shape is valid
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.matches('@').count() != 1 || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = trimmed.split_once('@')?;
    let domain_ok = domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.');
    if local.is_empty() || !domain_ok {
        return None;
    }
    Some(trimmed.to_lowercase())
}

pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Field key -> validators, configured per entity type
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Vec<Arc<dyn FieldValidator>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field: impl Into<String>, validator: impl FieldValidator + 'static) -> &mut Self {
        self.validators.entry(field.into()).or_default().push(Arc::new(validator));
        self
    }

    pub fn with(mut self, field: impl Into<String>, validator: impl FieldValidator + 'static) -> Self {
        self.register(field, validator);
        self
    }

    pub fn for_field(&self, field: &str) -> &[Arc<dyn FieldValidator>] {
        self.validators.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<_> = self.validators.keys().collect();
        fields.sort();
        f.debug_struct("ValidatorRegistry").field("fields", &fields).finish()
    }
}

/// Outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.summary.total_errors
    }

    /// `row_index` values that carry at least one error
    pub fn error_rows(&self) -> BTreeSet<usize> {
        self.issues.iter().filter(|i| i.is_error()).map(|i| i.row).collect()
    }

    pub fn issues_for_row(&self, row: usize) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.row == row)
    }

    /// Copies of `rows` with the bookkeeping fields filled from this report
    pub fn annotate(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter()
            .map(|row| {
                let mut annotated = row.clone();
                annotated.clear_bookkeeping();
                for issue in self.issues_for_row(row.row_index) {
                    let line = format!("{}: {}", issue.field, issue.message);
                    match issue.severity {
                        Severity::Error => annotated.errors.push(line),
                        Severity::Warning => annotated.warnings.push(line),
                        Severity::Info => {}
                    }
                }
                annotated.has_errors = !annotated.errors.is_empty();
                annotated.has_warnings = !annotated.warnings.is_empty();
                annotated
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    registry: ValidatorRegistry,
}

impl ValidationEngine {
    pub fn new(registry: ValidatorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Validate `rows` against `rules`.
    ///
    /// Only malformed rules return an error; data problems become issues.
    pub fn validate(&self, rows: &[Row], rules: &[ColumnRule]) -> Result<ValidationReport, RuleError> {
        check_rules(rules)?;

        let mut issues = Vec::new();
        let mut summary = ValidationSummary {
            total_rows: rows.len(),
            ..Default::default()
        };
        let mut seen: HashMap<String, usize> = HashMap::new();

        for row in rows {
            for rule in rules {
                self.validate_field(row, rule, &mut issues, &mut summary);
            }

            let key = row.value_key();
            if key.is_empty() {
                continue;
            }
            match seen.get(&key) {
                Some(&first) => {
                    summary.duplicated_row_indices.push(row.row_index);
                    let mut issue = ValidationIssue::new(
                        row.row_index,
                        ROW_FIELD,
                        ScalarValue::Empty,
                        Severity::Warning,
                        format!("Fila duplicada: la fila {} es idéntica a la fila {}", row.row_index, first),
                    );
                    issue.related_row = Some(first);
                    issues.push(issue);
                }
                None => {
                    seen.insert(key, row.row_index);
                }
            }
        }

        let mut error_rows = HashSet::new();
        let mut warning_rows = HashSet::new();
        for issue in &issues {
            match issue.severity {
                Severity::Error => {
                    summary.total_errors += 1;
                    error_rows.insert(issue.row);
                }
                Severity::Warning => {
                    summary.total_warnings += 1;
                    warning_rows.insert(issue.row);
                }
                Severity::Info => summary.total_infos += 1,
            }
        }
        summary.rows_with_errors = error_rows.len();
        summary.rows_with_warnings = warning_rows.len();
        summary.valid_rows = rows.len().saturating_sub(error_rows.len());

        debug!(
            "Validated {} rows: {} errors, {} warnings, {} duplicates",
            summary.total_rows,
            summary.total_errors,
            summary.total_warnings,
            summary.duplicated_row_indices.len()
        );

        Ok(ValidationReport { issues, summary })
    }

    fn validate_field(
        &self,
        row: &Row,
        rule: &ColumnRule,
        issues: &mut Vec<ValidationIssue>,
        summary: &mut ValidationSummary,
    ) {
        let value = row.get(&rule.key);
        let issue = |severity: Severity, message: String| {
            ValidationIssue::new(row.row_index, rule.key.clone(), value.clone(), severity, message)
        };

        if value.is_empty() {
            if rule.required {
                summary.missing_required_fields.insert(rule.key.clone());
                issues.push(issue(Severity::Error, format!("Campo requerido: {}", rule.label)));
            }
            return;
        }

        match rule.column_type {
            ColumnType::Number => {
                if value.to_number().is_err() {
                    summary.invalid_type_fields.insert(rule.key.clone());
                    issues.push(issue(Severity::Error, format!("{} debe ser un número", rule.label)));
                    return;
                }
            }
            ColumnType::Date => match value {
                ScalarValue::Date(_) => {}
                ScalarValue::Text(s) if parse_iso_date(s).is_some() => {}
                ScalarValue::Text(s) => match parse_local_date(s) {
                    Some(date) => issues.push(
                        issue(Severity::Warning, format!("{} no está en formato AAAA-MM-DD", rule.label))
                            .with_suggestion(Some(date.format("%Y-%m-%d").to_string())),
                    ),
                    None => {
                        summary.invalid_type_fields.insert(rule.key.clone());
                        issues.push(issue(Severity::Error, format!("{} no es una fecha válida", rule.label)));
                        return;
                    }
                },
                _ => {
                    summary.invalid_type_fields.insert(rule.key.clone());
                    issues.push(issue(Severity::Error, format!("{} no es una fecha válida", rule.label)));
                    return;
                }
            },
            ColumnType::Boolean => {
                if value.to_bool().is_err() {
                    summary.invalid_type_fields.insert(rule.key.clone());
                    issues.push(issue(Severity::Error, format!("{} debe ser sí o no", rule.label)));
                    return;
                }
            }
            ColumnType::Text => {
                if let ScalarValue::Text(s) = value {
                    if s.trim() != s {
                        issues.push(
                            issue(Severity::Info, format!("{} tiene espacios al inicio o al final", rule.label))
                                .with_suggestion(Some(s.trim().to_string())),
                        );
                    }
                }
            }
        }

        for validator in self.registry.for_field(&rule.key) {
            if let Some(finding) = validator.check(value) {
                issues.push(issue(finding.severity, finding.message).with_suggestion(finding.suggestion));
            }
        }
    }
}

fn check_rules(rules: &[ColumnRule]) -> Result<(), RuleError> {
    let mut keys = HashSet::new();
    for (idx, rule) in rules.iter().enumerate() {
        if rule.key.trim().is_empty() {
            return Err(RuleError::EmptyKey(idx));
        }
        if !keys.insert(rule.key.as_str()) {
            return Err(RuleError::DuplicateKey(rule.key.clone()));
        }
    }
    Ok(())
}
