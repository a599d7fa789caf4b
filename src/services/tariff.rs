//! Tariff rule evaluation
//!
//! Rules are filtered (active, inside their validity window, conditions true),
//! sorted by ascending priority and their modifiers applied in declaration
//! order to a running `tarifa / peaje / extras` breakdown.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::FormulaError;
use crate::services::formula::{validate_formula, Formula, TARIFF_VARIABLES};
use crate::types::{
    ApplyTo, AppliedRule, BaseValues, Condition, ConditionOperator, FinalValues, LogicOp, Modifier, ModifierKind,
    ScalarValue, TariffEvaluation, TariffRule,
};

/// Order of rules sharing a priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the order in which rules were declared
    #[default]
    Position,
    /// Sort by rule code
    Code,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "position" | "posicion" | "posición" => Ok(TieBreak::Position),
            "code" | "codigo" | "código" => Ok(TieBreak::Code),
            other => Err(format!("Unknown tie-break policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TariffEvaluatorConfig {
    pub tie_break: TieBreak,
}

/// Running breakdown; `adjustment` holds modifiers that target the total
#[derive(Debug, Clone, Copy)]
struct Breakdown {
    tarifa: f64,
    peaje: f64,
    extras: f64,
    adjustment: f64,
}

impl Breakdown {
    fn total(&self) -> f64 {
        self.tarifa + self.peaje + self.extras + self.adjustment
    }

    fn get(&self, target: ApplyTo) -> f64 {
        match target {
            ApplyTo::Tarifa => self.tarifa,
            ApplyTo::Peaje => self.peaje,
            ApplyTo::Extras => self.extras,
            ApplyTo::Total => self.total(),
        }
    }

    fn set(&mut self, target: ApplyTo, value: f64) {
        match target {
            ApplyTo::Tarifa => self.tarifa = value,
            ApplyTo::Peaje => self.peaje = value,
            ApplyTo::Extras => self.extras = value,
            ApplyTo::Total => self.adjustment += value - self.total(),
        }
    }

    fn finish(&self) -> FinalValues {
        FinalValues {
            tarifa: self.tarifa,
            peaje: self.peaje,
            extras: self.extras,
            total: self.total(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TariffRuleEvaluator {
    config: TariffEvaluatorConfig,
}

impl TariffRuleEvaluator {
    pub fn new(config: TariffEvaluatorConfig) -> Self {
        Self { config }
    }

    /// Check every formula modifier against the registered variables
    pub fn validate_rules<'a>(&self, rules: impl IntoIterator<Item = &'a TariffRule>) -> Result<(), FormulaError> {
        for rule in rules {
            for modifier in &rule.modifiers {
                if modifier.kind != ModifierKind::Formula {
                    continue;
                }
                let source = modifier.formula.as_deref().unwrap_or_default();
                let report = validate_formula(source, TARIFF_VARIABLES.iter().copied());
                if !report.valida {
                    return Err(FormulaError::InvalidRuleFormula {
                        rule: rule.code.clone(),
                        message: report.errores.join("; "),
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluate with today's date
    pub fn evaluate(
        &self,
        base: BaseValues,
        context: &HashMap<String, ScalarValue>,
        rules: &[TariffRule],
    ) -> Result<TariffEvaluation, FormulaError> {
        self.evaluate_on(chrono::Local::now().date_naive(), base, context, rules)
    }

    pub fn evaluate_on(
        &self,
        date: NaiveDate,
        base: BaseValues,
        context: &HashMap<String, ScalarValue>,
        rules: &[TariffRule],
    ) -> Result<TariffEvaluation, FormulaError> {
        let mut candidates: Vec<&TariffRule> = rules
            .iter()
            .filter(|r| r.active && r.is_valid_on(date) && conditions_match(r, context))
            .collect();

        match self.config.tie_break {
            TieBreak::Position => candidates.sort_by_key(|r| r.priority),
            TieBreak::Code => candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.code.cmp(&b.code))),
        }

        self.validate_rules(candidates.iter().copied())?;

        let mut breakdown = Breakdown {
            tarifa: base.tarifa,
            peaje: base.peaje,
            extras: base.extras,
            adjustment: 0.0,
        };
        let mut applied_rules = Vec::with_capacity(candidates.len());

        for rule in candidates {
            let before = breakdown.total();
            for modifier in &rule.modifiers {
                apply_modifier(&mut breakdown, modifier, context).map_err(|e| FormulaError::InvalidRuleFormula {
                    rule: rule.code.clone(),
                    message: e.to_string(),
                })?;
            }
            let delta = breakdown.total() - before;
            debug!("Tariff rule {} applied, delta {:.2}", rule.code, delta);
            applied_rules.push(AppliedRule {
                code: rule.code.clone(),
                name: rule.name.clone(),
                delta,
            });
        }

        Ok(TariffEvaluation {
            final_values: breakdown.finish(),
            applied_rules,
        })
    }
}

fn apply_modifier(
    breakdown: &mut Breakdown,
    modifier: &Modifier,
    context: &HashMap<String, ScalarValue>,
) -> Result<(), FormulaError> {
    let current = breakdown.get(modifier.apply_to);
    let next = match modifier.kind {
        ModifierKind::Percentage => current * (1.0 + modifier.value / 100.0),
        ModifierKind::Fixed => current + modifier.value,
        ModifierKind::Formula => {
            let formula = Formula::parse(modifier.formula.as_deref().unwrap_or_default())?;
            formula.evaluate(&formula_variables(breakdown, context))?
        }
    };
    breakdown.set(modifier.apply_to, next);
    Ok(())
}

/// Registered variables default to 0; numeric context values are added on top
fn formula_variables(breakdown: &Breakdown, context: &HashMap<String, ScalarValue>) -> HashMap<String, f64> {
    let mut vars: HashMap<String, f64> = TARIFF_VARIABLES.iter().map(|v| (v.to_string(), 0.0)).collect();
    for (key, value) in context {
        if let Ok(n) = value.to_number() {
            vars.insert(key.to_lowercase(), n);
        }
    }
    vars.insert("tarifa".into(), breakdown.tarifa);
    vars.insert("peaje".into(), breakdown.peaje);
    vars.insert("extras".into(), breakdown.extras);
    vars.insert("total".into(), breakdown.total());
    vars
}

fn conditions_match(rule: &TariffRule, context: &HashMap<String, ScalarValue>) -> bool {
    if rule.conditions.is_empty() {
        return true;
    }
    let mut results = rule.conditions.iter().map(|c| condition_matches(c, context));
    match rule.logic_op {
        LogicOp::And => results.all(|m| m),
        LogicOp::Or => results.any(|m| m),
    }
}

/// Evaluate one condition; a missing or empty context field never matches
pub fn condition_matches(condition: &Condition, context: &HashMap<String, ScalarValue>) -> bool {
    let actual = match context.get(&condition.field) {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };

    match condition.operator {
        ConditionOperator::Eq => compare(actual, &condition.value) == Some(Ordering::Equal),
        ConditionOperator::Ne => compare(actual, &condition.value) != Some(Ordering::Equal),
        ConditionOperator::Gt => compare(actual, &condition.value) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(compare(actual, &condition.value), Some(Ordering::Greater | Ordering::Equal)),
        ConditionOperator::Lt => compare(actual, &condition.value) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(compare(actual, &condition.value), Some(Ordering::Less | Ordering::Equal)),
        ConditionOperator::Contains => actual
            .to_string()
            .to_lowercase()
            .contains(&condition.value.to_string().to_lowercase()),
        ConditionOperator::In => {
            if condition.values.is_empty() {
                condition
                    .value
                    .to_string()
                    .split(',')
                    .any(|candidate| compare(actual, &ScalarValue::text(candidate.trim())) == Some(Ordering::Equal))
            } else {
                condition
                    .values
                    .iter()
                    .any(|candidate| compare(actual, candidate) == Some(Ordering::Equal))
            }
        }
    }
}

/// Numbers compare numerically, dates chronologically, anything else as
/// case-insensitive text
fn compare(a: &ScalarValue, b: &ScalarValue) -> Option<Ordering> {
    if let (Ok(x), Ok(y)) = (a.to_number(), b.to_number()) {
        return x.partial_cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (a.to_date(), b.to_date()) {
        return Some(x.cmp(&y));
    }
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some(a.to_string().trim().to_lowercase().cmp(&b.to_string().trim().to_lowercase()))
}

/// Move the element at `from` to `to`; out-of-range indices leave the list as is
pub fn reorder<T>(mut list: Vec<T>, from: usize, to: usize) -> Vec<T> {
    if from >= list.len() || to >= list.len() || from == to {
        return list;
    }
    let item = list.remove(from);
    list.insert(to, item);
    list
}

/// Renumber priorities 1..=n following list order
pub fn recompute_priorities(rules: &mut [TariffRule]) {
    for (i, rule) in rules.iter_mut().enumerate() {
        rule.priority = i as i32 + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule(code: &str, priority: i32, modifiers: Vec<Modifier>) -> TariffRule {
        TariffRule {
            code: code.into(),
            name: format!("Regla {}", code),
            conditions: vec![],
            logic_op: LogicOp::And,
            modifiers,
            priority,
            active: true,
            valid_from: day(2024, 1, 1),
            valid_to: None,
        }
    }

    fn base() -> BaseValues {
        BaseValues {
            tarifa: 100.0,
            peaje: 20.0,
            extras: 0.0,
        }
    }

    fn context(pairs: &[(&str, ScalarValue)]) -> HashMap<String, ScalarValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn evaluator() -> TariffRuleEvaluator {
        TariffRuleEvaluator::default()
    }

    #[test]
    fn test_percentage_and_fixed_modifiers() {
        let rules = vec![
            rule("P", 1, vec![Modifier::percentage(ApplyTo::Tarifa, 10.0)]),
            rule("F", 2, vec![Modifier::fixed(ApplyTo::Peaje, 5.0)]),
        ];
        let eval = evaluator()
            .evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &rules)
            .unwrap();

        assert!((eval.final_values.tarifa - 110.0).abs() < 1e-9);
        assert_eq!(eval.final_values.peaje, 25.0);
        assert!((eval.final_values.total - 135.0).abs() < 1e-9);
        assert_eq!(eval.applied_rules.len(), 2);
        assert!((eval.applied_rules[0].delta - 10.0).abs() < 1e-9);
        assert_eq!(eval.applied_rules[1].delta, 5.0);
    }

    #[test]
    fn test_formula_modifier_uses_context_variables() {
        let rules = vec![rule(
            "PESO",
            1,
            vec![Modifier::formula(ApplyTo::Tarifa, "SI(peso > 1000, tarifa * 1.5, tarifa)")],
        )];
        let heavy = context(&[("peso", ScalarValue::Number(1200.0))]);
        let light = context(&[("peso", ScalarValue::text("800"))]);

        let eval = evaluator().evaluate_on(day(2024, 6, 1), base(), &heavy, &rules).unwrap();
        assert_eq!(eval.final_values.tarifa, 150.0);

        let eval = evaluator().evaluate_on(day(2024, 6, 1), base(), &light, &rules).unwrap();
        assert_eq!(eval.final_values.tarifa, 100.0);
        assert_eq!(eval.applied_rules[0].delta, 0.0);
    }

    #[test]
    fn test_total_modifier_adjusts_total_only() {
        let rules = vec![rule("T", 1, vec![Modifier::fixed(ApplyTo::Total, -20.0)])];
        let eval = evaluator().evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &rules).unwrap();
        assert_eq!(eval.final_values.tarifa, 100.0);
        assert_eq!(eval.final_values.total, 100.0);
    }

    #[test]
    fn test_inactive_and_out_of_window_rules_are_skipped() {
        let mut inactive = rule("OFF", 1, vec![Modifier::fixed(ApplyTo::Tarifa, 50.0)]);
        inactive.active = false;
        let mut expired = rule("OLD", 1, vec![Modifier::fixed(ApplyTo::Tarifa, 50.0)]);
        expired.valid_to = Some(day(2024, 3, 31));

        let eval = evaluator()
            .evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &[inactive, expired])
            .unwrap();
        assert!(eval.applied_rules.is_empty());
        assert_eq!(eval.final_values.total, 120.0);
    }

    #[test]
    fn test_conditions_with_and_or() {
        let mut r = rule("ZONA", 1, vec![Modifier::fixed(ApplyTo::Extras, 10.0)]);
        r.conditions = vec![
            Condition::new("zona", ConditionOperator::Eq, "Norte"),
            Condition::new("bultos", ConditionOperator::Gte, 3.0),
        ];
        let ctx = context(&[("zona", ScalarValue::text("norte")), ("bultos", ScalarValue::Number(2.0))]);

        let eval = evaluator().evaluate_on(day(2024, 6, 1), base(), &ctx, &[r.clone()]).unwrap();
        assert!(eval.applied_rules.is_empty());

        r.logic_op = LogicOp::Or;
        let eval = evaluator().evaluate_on(day(2024, 6, 1), base(), &ctx, &[r]).unwrap();
        assert_eq!(eval.final_values.extras, 10.0);
    }

    #[test]
    fn test_missing_field_never_matches() {
        let cond = Condition::new("zona", ConditionOperator::Ne, "Sur");
        assert!(!condition_matches(&cond, &HashMap::new()));
    }

    #[test]
    fn test_in_and_contains_operators() {
        let ctx = context(&[("destino", ScalarValue::text("Valencia Puerto"))]);
        let mut cond = Condition::new("destino", ConditionOperator::Contains, "puerto");
        assert!(condition_matches(&cond, &ctx));

        let ctx = context(&[("zona", ScalarValue::text("B"))]);
        cond = Condition::new("zona", ConditionOperator::In, "A, B, C");
        assert!(condition_matches(&cond, &ctx));
        cond.values = vec![ScalarValue::text("C")];
        assert!(!condition_matches(&cond, &ctx));
    }

    #[test]
    fn test_equal_priorities_follow_tie_break() {
        let rules = vec![
            rule("B", 1, vec![Modifier::fixed(ApplyTo::Tarifa, 10.0)]),
            rule("A", 1, vec![Modifier::percentage(ApplyTo::Tarifa, 100.0)]),
        ];

        let by_position = evaluator().evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &rules).unwrap();
        assert_eq!(by_position.applied_rules[0].code, "B");
        assert_eq!(by_position.final_values.tarifa, 220.0);

        let by_code = TariffRuleEvaluator::new(TariffEvaluatorConfig { tie_break: TieBreak::Code })
            .evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &rules)
            .unwrap();
        assert_eq!(by_code.applied_rules[0].code, "A");
        assert_eq!(by_code.final_values.tarifa, 210.0);
    }

    #[test]
    fn test_invalid_formula_is_rejected_before_evaluation() {
        let rules = vec![rule("BAD", 1, vec![Modifier::formula(ApplyTo::Tarifa, "tarifa * recargo")])];
        let err = evaluator()
            .evaluate_on(day(2024, 6, 1), base(), &HashMap::new(), &rules)
            .unwrap_err();
        assert!(matches!(err, FormulaError::InvalidRuleFormula { ref rule, .. } if rule == "BAD"));
    }

    #[test]
    fn test_reorder_and_recompute_priorities() {
        let mut rules = reorder(
            vec![rule("A", 5, vec![]), rule("B", 5, vec![]), rule("C", 9, vec![])],
            2,
            0,
        );
        recompute_priorities(&mut rules);
        let order: Vec<(&str, i32)> = rules.iter().map(|r| (r.code.as_str(), r.priority)).collect();
        assert_eq!(order, vec![("C", 1), ("A", 2), ("B", 3)]);

        let unchanged = reorder(vec![1, 2, 3], 5, 0);
        assert_eq!(unchanged, vec![1, 2, 3]);
    }

    #[test]
    fn test_tie_break_parses_from_str() {
        assert_eq!("code".parse::<TieBreak>(), Ok(TieBreak::Code));
        assert_eq!("Position".parse::<TieBreak>(), Ok(TieBreak::Position));
        assert!("random".parse::<TieBreak>().is_err());
    }
}
