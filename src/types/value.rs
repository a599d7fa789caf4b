//! Scalar cell values
//!
//! Rows coming from a spreadsheet carry loosely typed cells. They are held as a
//! `ScalarValue` and converted into the type a column expects with explicit,
//! fallible conversions instead of silent coercion.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ColumnType;

/// Date formats accepted besides ISO `YYYY-MM-DD`, tried in order
const LOCAL_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y"];

/// Words accepted as boolean `true` (compared lowercase)
const TRUE_WORDS: &[&str] = &["true", "si", "sí", "s", "yes", "y", "1", "x", "verdadero"];
/// Words accepted as boolean `false` (compared lowercase)
const FALSE_WORDS: &[&str] = &["false", "no", "n", "0", "falso"];

/// One cell of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Empty,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

/// A value that cannot be read as the type its column declares
#[derive(Debug, Clone, PartialEq, Error)]
#[error("'{value}' no es un valor de tipo {expected} válido")]
pub struct TypeError {
    pub value: String,
    pub expected: ColumnType,
}

impl ScalarValue {
    pub fn text(s: impl Into<String>) -> Self {
        ScalarValue::Text(s.into())
    }

    /// `Empty`, or text made only of whitespace
    pub fn is_empty(&self) -> bool {
        match self {
            ScalarValue::Empty => true,
            ScalarValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn type_error(&self, expected: ColumnType) -> TypeError {
        TypeError {
            value: self.to_string(),
            expected,
        }
    }

    pub fn to_number(&self) -> Result<f64, TypeError> {
        match self {
            ScalarValue::Number(n) if n.is_finite() => Ok(*n),
            ScalarValue::Text(s) => parse_number(s).ok_or_else(|| self.type_error(ColumnType::Number)),
            _ => Err(self.type_error(ColumnType::Number)),
        }
    }

    pub fn to_date(&self) -> Result<NaiveDate, TypeError> {
        match self {
            ScalarValue::Date(d) => Ok(*d),
            ScalarValue::Text(s) => parse_date(s).ok_or_else(|| self.type_error(ColumnType::Date)),
            _ => Err(self.type_error(ColumnType::Date)),
        }
    }

    pub fn to_bool(&self) -> Result<bool, TypeError> {
        match self {
            ScalarValue::Bool(b) => Ok(*b),
            ScalarValue::Number(n) if *n == 0.0 || *n == 1.0 => Ok(*n == 1.0),
            ScalarValue::Text(s) => {
                let lower = s.trim().to_lowercase();
                if TRUE_WORDS.contains(&lower.as_str()) {
                    Ok(true)
                } else if FALSE_WORDS.contains(&lower.as_str()) {
                    Ok(false)
                } else {
                    Err(self.type_error(ColumnType::Boolean))
                }
            }
            _ => Err(self.type_error(ColumnType::Boolean)),
        }
    }

    /// Convert into the variant `ty` expects. `Empty` stays `Empty`.
    pub fn coerce(&self, ty: ColumnType) -> Result<ScalarValue, TypeError> {
        if self.is_empty() {
            return Ok(ScalarValue::Empty);
        }
        match ty {
            ColumnType::Text => Ok(match self {
                ScalarValue::Text(_) => self.clone(),
                other => ScalarValue::Text(other.to_string()),
            }),
            ColumnType::Number => self.to_number().map(ScalarValue::Number),
            ColumnType::Date => self.to_date().map(ScalarValue::Date),
            ColumnType::Boolean => self.to_bool().map(ScalarValue::Bool),
        }
    }

    /// Stable textual key used to compare rows for duplicates
    pub fn dedup_key(&self) -> String {
        match self {
            ScalarValue::Empty => String::new(),
            ScalarValue::Text(s) => format!("t:{}", s.trim()),
            ScalarValue::Number(n) => format!("n:{}", n),
            ScalarValue::Bool(b) => format!("b:{}", b),
            ScalarValue::Date(d) => format!("d:{}", d.format("%Y-%m-%d")),
        }
    }
}

impl Default for ScalarValue {
    fn default() -> Self {
        ScalarValue::Empty
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Empty => Ok(()),
            ScalarValue::Text(s) => write!(f, "{}", s),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Text(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Text(s)
    }
}

impl From<f64> for ScalarValue {
    fn from(n: f64) -> Self {
        ScalarValue::Number(n)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Bool(b)
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(d: NaiveDate) -> Self {
        ScalarValue::Date(d)
    }
}

/// Parse a number, accepting a decimal comma when no dot is present
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = trimmed.parse::<f64>().ok().or_else(|| {
        if trimmed.contains('.') {
            None
        } else {
            trimmed.replace(',', ".").parse::<f64>().ok()
        }
    })?;
    parsed.is_finite().then_some(parsed)
}

/// Parse an ISO `YYYY-MM-DD` date only
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse a non-ISO local date (`DD/MM/YYYY`, `DD.MM.YYYY`, `DD-MM-YYYY`)
pub fn parse_local_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    LOCAL_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Parse any accepted date format, ISO first
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    parse_iso_date(s).or_else(|| parse_local_date(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_blank_text_are_empty() {
        assert!(ScalarValue::Empty.is_empty());
        assert!(ScalarValue::text("   ").is_empty());
        assert!(!ScalarValue::text("a").is_empty());
        assert!(!ScalarValue::Number(0.0).is_empty());
    }

    #[test]
    fn test_to_number_accepts_decimal_comma() {
        assert_eq!(ScalarValue::text("12,5").to_number(), Ok(12.5));
        assert_eq!(ScalarValue::text(" 42 ").to_number(), Ok(42.0));
        assert!(ScalarValue::text("1.234,5").to_number().is_err());
        assert!(ScalarValue::text("abc").to_number().is_err());
    }

    #[test]
    fn test_to_date_accepts_iso_and_local_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(ScalarValue::text("2024-03-15").to_date(), Ok(expected));
        assert_eq!(ScalarValue::text("15/03/2024").to_date(), Ok(expected));
        assert_eq!(ScalarValue::text("15.03.2024").to_date(), Ok(expected));
        assert!(ScalarValue::text("31/02/2024").to_date().is_err());
    }

    #[test]
    fn test_to_bool_reads_spanish_words() {
        assert_eq!(ScalarValue::text("Sí").to_bool(), Ok(true));
        assert_eq!(ScalarValue::text("no").to_bool(), Ok(false));
        assert!(ScalarValue::text("quizás").to_bool().is_err());
    }

    #[test]
    fn test_coerce_reports_expected_type() {
        let err = ScalarValue::text("mañana").coerce(ColumnType::Date).unwrap_err();
        assert_eq!(err.expected, ColumnType::Date);
        assert_eq!(err.value, "mañana");
        assert_eq!(ScalarValue::Empty.coerce(ColumnType::Number), Ok(ScalarValue::Empty));
    }

    #[test]
    fn test_untagged_json_shape() {
        let values = vec![
            ScalarValue::Empty,
            ScalarValue::Bool(true),
            ScalarValue::Number(1.5),
            ScalarValue::text("hola"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,true,1.5,"hola"]"#);

        let date: ScalarValue = serde_json::from_str(r#""2024-01-31""#).unwrap();
        assert_eq!(date, ScalarValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
    }
}
