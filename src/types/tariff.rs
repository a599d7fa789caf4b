//! Tariff rule types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ScalarValue;

/// How the conditions of a rule combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOp {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    Contains,
    In,
}

/// `field operator value` test against the evaluation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: ScalarValue,
    /// Candidate list for `in`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ScalarValue>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<ScalarValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierKind {
    #[serde(rename = "porcentaje", alias = "percentage")]
    Percentage,
    #[serde(rename = "fijo", alias = "fixed")]
    Fixed,
    Formula,
}

/// Component of the breakdown a modifier targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyTo {
    Tarifa,
    Peaje,
    Extras,
    Total,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    #[serde(rename = "tipo", alias = "type")]
    pub kind: ModifierKind,
    #[serde(rename = "valor", alias = "value", default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(rename = "aplicarA", alias = "applyTo")]
    pub apply_to: ApplyTo,
}

impl Modifier {
    pub fn percentage(apply_to: ApplyTo, value: f64) -> Self {
        Self { kind: ModifierKind::Percentage, value, formula: None, apply_to }
    }

    pub fn fixed(apply_to: ApplyTo, value: f64) -> Self {
        Self { kind: ModifierKind::Fixed, value, formula: None, apply_to }
    }

    pub fn formula(apply_to: ApplyTo, formula: impl Into<String>) -> Self {
        Self { kind: ModifierKind::Formula, value: 0.0, formula: Some(formula.into()), apply_to }
    }
}

/// Conditional pricing adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffRule {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic_op: LogicOp,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub valid_from: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<NaiveDate>,
}

fn default_active() -> bool {
    true
}

impl TariffRule {
    /// Whether `date` falls inside `valid_from..=valid_to`
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        date >= self.valid_from && self.valid_to.map_or(true, |to| date <= to)
    }
}

/// Base monetary values a rule set is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseValues {
    pub tarifa: f64,
    pub peaje: f64,
    #[serde(default)]
    pub extras: f64,
}

/// Breakdown after every applicable rule ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalValues {
    pub tarifa: f64,
    pub peaje: f64,
    pub extras: f64,
    pub total: f64,
}

/// Rule that changed the breakdown, with the change to the total it caused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRule {
    pub code: String,
    pub name: String,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffEvaluation {
    #[serde(rename = "final")]
    pub final_values: FinalValues,
    pub applied_rules: Vec<AppliedRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserializes_from_spanish_modifier_keys() {
        let json = r#"{
            "code": "R-01",
            "name": "Recargo nocturno",
            "conditions": [{"field": "horario", "operator": "eq", "value": "nocturno"}],
            "logicOp": "AND",
            "modifiers": [{"tipo": "porcentaje", "valor": 15, "aplicarA": "tarifa"}],
            "priority": 1,
            "validFrom": "2024-01-01"
        }"#;
        let rule: TariffRule = serde_json::from_str(json).unwrap();
        assert!(rule.active);
        assert_eq!(rule.modifiers[0].kind, ModifierKind::Percentage);
        assert_eq!(rule.modifiers[0].apply_to, ApplyTo::Tarifa);
        assert_eq!(rule.conditions[0].operator, ConditionOperator::Eq);
        assert!(rule.valid_to.is_none());
    }

    #[test]
    fn test_operator_accepts_symbol_aliases() {
        let op: ConditionOperator = serde_json::from_str(r#"">=""#).unwrap();
        assert_eq!(op, ConditionOperator::Gte);
    }

    #[test]
    fn test_validity_window_is_inclusive() {
        let rule = TariffRule {
            code: "R".into(),
            name: "R".into(),
            conditions: vec![],
            logic_op: LogicOp::And,
            modifiers: vec![],
            priority: 1,
            active: true,
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            valid_to: NaiveDate::from_ymd_opt(2024, 12, 31),
        };
        assert!(rule.is_valid_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(rule.is_valid_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(!rule.is_valid_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(!rule.is_valid_on(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()));
    }

    #[test]
    fn test_evaluation_serializes_final_key() {
        let eval = TariffEvaluation {
            final_values: FinalValues { tarifa: 1.0, peaje: 0.0, extras: 0.0, total: 1.0 },
            applied_rules: vec![],
        };
        let json = serde_json::to_string(&eval).unwrap();
        assert!(json.contains("\"final\""));
        assert!(json.contains("appliedRules"));
    }
}
