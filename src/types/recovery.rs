//! Recovery plan types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryOptionId {
    RetryAll,
    RetryCheckpoint,
    RetryFailed,
    ExportFailed,
    AutoFix,
}

impl RecoveryOptionId {
    pub const ALL: [RecoveryOptionId; 5] = [
        RecoveryOptionId::RetryAll,
        RecoveryOptionId::RetryCheckpoint,
        RecoveryOptionId::RetryFailed,
        RecoveryOptionId::ExportFailed,
        RecoveryOptionId::AutoFix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOptionId::RetryAll => "retry-all",
            RecoveryOptionId::RetryCheckpoint => "retry-checkpoint",
            RecoveryOptionId::RetryFailed => "retry-failed",
            RecoveryOptionId::ExportFailed => "export-failed",
            RecoveryOptionId::AutoFix => "auto-fix",
        }
    }

    /// Human-readable name shown in the recovery dialog
    pub fn display_name(&self) -> &'static str {
        match self {
            RecoveryOptionId::RetryAll => "Reintentar todo",
            RecoveryOptionId::RetryCheckpoint => "Reintentar desde el último punto de control",
            RecoveryOptionId::RetryFailed => "Reintentar solo los registros fallidos",
            RecoveryOptionId::ExportFailed => "Exportar registros fallidos",
            RecoveryOptionId::AutoFix => "Corrección automática",
        }
    }
}

impl fmt::Display for RecoveryOptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryOptionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecoveryOptionId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| format!("Opción de recuperación desconocida: {}", s))
    }
}

/// Level of a recovery log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryLogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of the structured recovery log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub option: RecoveryOptionId,
    pub level: RecoveryLogLevel,
    pub message: String,
}

impl RecoveryLogEntry {
    pub fn new(option: RecoveryOptionId, level: RecoveryLogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            option,
            level,
            message: message.into(),
        }
    }

    pub fn info(option: RecoveryOptionId, message: impl Into<String>) -> Self {
        Self::new(option, RecoveryLogLevel::Info, message)
    }

    pub fn success(option: RecoveryOptionId, message: impl Into<String>) -> Self {
        Self::new(option, RecoveryLogLevel::Success, message)
    }

    pub fn warning(option: RecoveryOptionId, message: impl Into<String>) -> Self {
        Self::new(option, RecoveryLogLevel::Warning, message)
    }

    pub fn error(option: RecoveryOptionId, message: impl Into<String>) -> Self {
        Self::new(option, RecoveryLogLevel::Error, message)
    }
}

/// Aggregate outcome of a recovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    pub recovered_records: usize,
    pub remaining_errors: usize,
    pub logs: Vec<RecoveryLogEntry>,
}

impl RecoveryResult {
    pub fn errors(&self) -> impl Iterator<Item = &RecoveryLogEntry> {
        self.logs.iter().filter(|l| l.level == RecoveryLogLevel::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_id_round_trips_through_str() {
        for id in RecoveryOptionId::ALL {
            assert_eq!(id.as_str().parse::<RecoveryOptionId>(), Ok(id));
        }
        assert!("retry-everything".parse::<RecoveryOptionId>().is_err());
    }

    #[test]
    fn test_option_id_serializes_kebab_case() {
        let json = serde_json::to_string(&RecoveryOptionId::RetryCheckpoint).unwrap();
        assert_eq!(json, "\"retry-checkpoint\"");
    }

    #[test]
    fn test_log_entry_serializes_level() {
        let entry = RecoveryLogEntry::error(RecoveryOptionId::RetryAll, "Fallo de red");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"level\":\"error\""));
        assert!(json.contains("\"option\":\"retry-all\""));
    }
}
