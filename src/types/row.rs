//! Rows and column rules

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ScalarValue;

/// Expected type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "texto",
            ColumnType::Number => "número",
            ColumnType::Date => "fecha",
            ColumnType::Boolean => "booleano",
        };
        f.write_str(name)
    }
}

/// Description of one importable field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRule {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub filterable: bool,
}

impl ColumnRule {
    pub fn new(key: impl Into<String>, label: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            column_type,
            required: false,
            sortable: true,
            filterable: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One record being imported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// 1-based position in the source file
    pub row_index: usize,
    pub values: BTreeMap<String, ScalarValue>,
    #[serde(default)]
    pub has_errors: bool,
    #[serde(default)]
    pub has_warnings: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Row {
    pub fn new(row_index: usize) -> Self {
        Self {
            row_index,
            ..Default::default()
        }
    }

    /// Builder-style helper used by parsers and tests
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Value of `key`, `Empty` when absent
    pub fn get(&self, key: &str) -> &ScalarValue {
        static EMPTY: ScalarValue = ScalarValue::Empty;
        self.values.get(key).unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, key: impl Into<String>, value: ScalarValue) {
        self.values.insert(key.into(), value);
    }

    /// Drop validation bookkeeping, leaving only the values
    pub fn clear_bookkeeping(&mut self) {
        self.has_errors = false;
        self.has_warnings = false;
        self.errors.clear();
        self.warnings.clear();
    }

    /// Value tuple used for duplicate detection (bookkeeping excluded)
    pub fn value_key(&self) -> String {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", k, v.dedup_key()))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_field_is_empty() {
        let row = Row::new(1).with("email", "a@b.com");
        assert_eq!(row.get("email"), &ScalarValue::text("a@b.com"));
        assert_eq!(row.get("telefono"), &ScalarValue::Empty);
    }

    #[test]
    fn test_value_key_ignores_bookkeeping_and_index() {
        let mut a = Row::new(1).with("codigo", "C1").with("tarifa", 10.0);
        let b = Row::new(7).with("tarifa", 10.0).with("codigo", "C1");
        a.has_errors = true;
        a.errors.push("x".to_string());
        assert_eq!(a.value_key(), b.value_key());
    }

    #[test]
    fn test_value_key_treats_blank_as_absent() {
        let a = Row::new(1).with("codigo", "C1").with("notas", "  ");
        let b = Row::new(2).with("codigo", "C1");
        assert_eq!(a.value_key(), b.value_key());
    }

    #[test]
    fn test_column_rule_deserializes_type_field() {
        let json = r#"{"key":"tarifa","label":"Tarifa","type":"number","required":true}"#;
        let rule: ColumnRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.column_type, ColumnType::Number);
        assert!(rule.required);
        assert!(!rule.sortable);
    }

    #[test]
    fn test_row_serializes_to_camel_case() {
        let row = Row::new(3).with("codigo", "X");
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("rowIndex"));
        assert!(json.contains("hasErrors"));
        assert!(!json.contains("\"errors\""));
    }
}
