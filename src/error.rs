//! Error types
//!
//! Data-shape problems are reported as validation issues, never as errors.
//! The types here cover what is left: malformed configuration, rejected
//! wizard transitions, transport failures and formula problems.

use thiserror::Error;

use crate::types::FailureReport;

/// Errors surfaced at the wizard-action boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WizardError {
    /// Error-severity issues block the import step
    #[error("La importación está bloqueada por {errors} errores de validación")]
    Validation { errors: usize },

    /// Import call failed; retryable
    #[error("Error de transporte: {0}")]
    Transport(Box<FailureReport>),

    /// User-initiated cancellation; not a failure
    #[error("Operación cancelada por el usuario")]
    Cancelled,

    /// Missing entity mapping or template; fatal to the current action only
    #[error("Error de configuración: {0}")]
    Configuration(String),

    #[error("Transición de paso {from} a {to} rechazada: {reason}")]
    TransitionRejected { from: u8, to: u8, reason: String },

    /// Uploaded file could not be turned into rows
    #[error("No se pudo leer el archivo: {0}")]
    Parse(String),

    #[error(transparent)]
    InvalidRules(#[from] RuleError),

    #[error("Error interno: {0}")]
    Internal(String),
}

impl WizardError {
    pub fn rejected(from: u8, to: u8, reason: impl Into<String>) -> Self {
        WizardError::TransitionRejected {
            from,
            to,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WizardError::Transport(_))
    }
}

impl From<FailureReport> for WizardError {
    fn from(report: FailureReport) -> Self {
        WizardError::Transport(Box::new(report))
    }
}

/// Malformed column rule input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("La regla de columna en la posición {0} no tiene clave")]
    EmptyKey(usize),

    #[error("Clave de columna duplicada: {0}")]
    DuplicateKey(String),
}

/// Formula tokenizer, parser and evaluator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("La fórmula está vacía")]
    Empty,

    #[error("Carácter no válido '{ch}' en la posición {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("Paréntesis no balanceados")]
    UnbalancedParentheses,

    #[error("Se esperaba {expected} en la posición {position}")]
    UnexpectedToken { expected: String, position: usize },

    #[error("Variable no definida: {0}")]
    UndefinedVariable(String),

    #[error("Función desconocida: {0}")]
    UnknownFunction(String),

    #[error("La función {name} espera {expected} argumentos, recibió {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("División por cero")]
    DivisionByZero,

    #[error("La fórmula supera el máximo de {max} caracteres")]
    TooLong { max: usize },

    #[error("La fórmula supera el máximo de {max} elementos")]
    TooManyTokens { max: usize },

    #[error("La fórmula supera el máximo de {max} niveles de paréntesis")]
    TooDeep { max: usize },

    #[error("La fórmula de la regla {rule} no es válida: {message}")]
    InvalidRuleFormula { rule: String, message: String },
}

/// A recovery step that could not complete
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("El reintento falló: {0}")]
    Retry(Box<FailureReport>),

    #[error("La exportación falló: {0}")]
    Export(String),

    #[error("No hay registros para {0}")]
    NothingToProcess(String),

    #[error("La opción {0} no es aplicable: {1}")]
    NotApplicable(String, String),
}

impl From<FailureReport> for RecoveryError {
    fn from(report: FailureReport) -> Self {
        RecoveryError::Retry(Box::new(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_transport_error_is_retryable() {
        let report = FailureReport::new("clientes", ErrorKind::Network, "sin conexión");
        let err = WizardError::from(report);
        assert!(err.is_retryable());
        assert!(!WizardError::Cancelled.is_retryable());
    }

    #[test]
    fn test_unbalanced_message() {
        assert_eq!(FormulaError::UnbalancedParentheses.to_string(), "Paréntesis no balanceados");
    }

    #[test]
    fn test_rule_error_converts_into_wizard_error() {
        let err: WizardError = RuleError::DuplicateKey("email".into()).into();
        assert_eq!(err.to_string(), "Clave de columna duplicada: email");
    }
}
