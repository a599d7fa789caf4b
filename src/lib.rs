//! Tarifa Import - spreadsheet import wizard core
//!
//! Validation, correction, failure recovery and the step-by-step import
//! wizard, plus the tariff rule evaluator and its formula language.

pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod services;
pub mod types;

pub use error::{FormulaError, RecoveryError, RuleError, WizardError};
pub use services::recovery::RecoveryPlanner;
pub use services::tariff::TariffRuleEvaluator;
pub use services::wizard::ImportWizard;
