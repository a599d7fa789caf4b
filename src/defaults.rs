use std::time::Duration;

/// Timeout for one import-backend call when none is configured
pub const DEFAULT_IMPORT_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 100;

/// Minimum digits for a phone number to be accepted or auto-fixed
pub const DEFAULT_PHONE_MIN_DIGITS: usize = 9;

pub const DEFAULT_LOGS_DIR: &str = "./logs";

pub fn default_import_timeout() -> Duration {
    Duration::from_secs(DEFAULT_IMPORT_TIMEOUT_SECS)
}
