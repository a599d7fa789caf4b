//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::defaults::{
    DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_IMPORT_TIMEOUT_SECS, DEFAULT_LOGS_DIR, DEFAULT_PHONE_MIN_DIGITS,
};
use crate::services::tariff::{TariffEvaluatorConfig, TieBreak};
use crate::services::wizard::WizardConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for each import-backend call
    pub import_timeout: Duration,

    /// Batch size forwarded to the import backend
    pub import_batch_size: usize,

    /// Minimum digits for phone validation and auto-fix
    pub phone_min_digits: usize,

    /// Ordering of tariff rules that share a priority
    pub tariff_tie_break: TieBreak,

    /// Optional JSON file for import history persistence
    pub history_file: Option<PathBuf>,

    /// Directory for rolling log files
    pub logs_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            import_timeout: Duration::from_secs(DEFAULT_IMPORT_TIMEOUT_SECS),
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            phone_min_digits: DEFAULT_PHONE_MIN_DIGITS,
            tariff_tie_break: TieBreak::default(),
            history_file: None,
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let timeout_secs: u64 = env_parse("IMPORT_TIMEOUT_SECS", DEFAULT_IMPORT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            anyhow::bail!("IMPORT_TIMEOUT_SECS must be greater than 0");
        }

        let import_batch_size = env_parse("IMPORT_BATCH_SIZE", DEFAULT_IMPORT_BATCH_SIZE)?;
        if import_batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be greater than 0");
        }

        let phone_min_digits = env_parse("PHONE_MIN_DIGITS", DEFAULT_PHONE_MIN_DIGITS)?;

        let tariff_tie_break = match std::env::var("TARIFF_TIE_BREAK") {
            Ok(value) => value
                .parse::<TieBreak>()
                .map_err(anyhow::Error::msg)
                .context("TARIFF_TIE_BREAK must be 'position' or 'code'")?,
            Err(_) => TieBreak::default(),
        };

        let history_file = std::env::var("IMPORT_HISTORY_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let logs_dir = std::env::var("LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOGS_DIR));

        Ok(Self {
            import_timeout: Duration::from_secs(timeout_secs),
            import_batch_size,
            phone_min_digits,
            tariff_tie_break,
            history_file,
            logs_dir,
        })
    }

    pub fn wizard_config(&self) -> WizardConfig {
        WizardConfig {
            import_timeout: self.import_timeout,
            batch_size: Some(self.import_batch_size),
        }
    }

    pub fn tariff_config(&self) -> TariffEvaluatorConfig {
        TariffEvaluatorConfig {
            tie_break: self.tariff_tie_break,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_defaults() {
        let config = Config::default();
        assert_eq!(config.import_timeout, Duration::from_secs(30));
        assert_eq!(config.import_batch_size, 100);
        assert_eq!(config.tariff_tie_break, TieBreak::Position);
        assert!(config.history_file.is_none());
    }

    #[test]
    fn test_wizard_config_carries_timeout_and_batch() {
        let config = Config {
            import_timeout: Duration::from_secs(5),
            import_batch_size: 25,
            ..Config::default()
        };
        let wizard = config.wizard_config();
        assert_eq!(wizard.import_timeout, Duration::from_secs(5));
        assert_eq!(wizard.batch_size, Some(25));
    }

    #[test]
    fn test_env_parse_uses_default_when_unset() {
        let value: u64 = env_parse("TARIFA_IMPORT_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_rejects_invalid_timeout() {
        std::env::set_var("IMPORT_TIMEOUT_SECS", "soon");
        assert!(Config::from_env().is_err());
        std::env::remove_var("IMPORT_TIMEOUT_SECS");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_reads_tie_break() {
        std::env::set_var("TARIFF_TIE_BREAK", "code");

        let config = Config::from_env().unwrap();
        assert_eq!(config.tariff_tie_break, TieBreak::Code);

        // Cleanup
        std::env::remove_var("TARIFF_TIE_BREAK");
    }
}
