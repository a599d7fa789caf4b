//! Import history
//!
//! Keeps the most recent import outcomes in memory, newest first, with
//! optional JSON persistence so history survives restarts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{FailureReport, ImportResult};

const MAX_HISTORY_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// One import attempt in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub outcome: ImportOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryResponse {
    pub imports: Vec<ImportHistoryEntry>,
    pub total: usize,
}

/// Bounded import history backed by an in-memory deque and, optionally, a JSON file
#[derive(Debug, Clone, Default)]
pub struct ImportHistory {
    history: Arc<RwLock<VecDeque<ImportHistoryEntry>>>,
    file: Option<PathBuf>,
}

impl ImportHistory {
    /// In-memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries from `path` if it exists; every change is written back
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = load_from_disk(&path) {
            deque.extend(loaded.into_iter().take(MAX_HISTORY_SIZE));
            info!("Loaded {} import history entries from {}", deque.len(), path.display());
        }
        Self {
            history: Arc::new(RwLock::new(deque)),
            file: Some(path),
        }
    }

    pub fn record_completed(&self, result: &ImportResult, started_at: DateTime<Utc>) {
        self.add_entry(ImportHistoryEntry {
            id: result.id,
            entity_type: result.entity_type.clone(),
            outcome: ImportOutcome::Completed,
            started_at,
            completed_at: result.timestamp,
            duration_ms: duration_ms(started_at, result.timestamp),
            total: result.total,
            success: result.success,
            failed: result.failed,
            error: None,
        });
    }

    pub fn record_failed(&self, report: &FailureReport, started_at: DateTime<Utc>) {
        self.add_entry(ImportHistoryEntry {
            id: Uuid::new_v4(),
            entity_type: report.entity_type.clone(),
            outcome: ImportOutcome::Failed,
            started_at,
            completed_at: report.timestamp,
            duration_ms: duration_ms(started_at, report.timestamp),
            total: report.total_records,
            success: report.processed_records,
            failed: report.failed_records,
            error: Some(report.message.clone()),
        });
    }

    pub fn record_cancelled(&self, entity_type: &str, total: usize, started_at: DateTime<Utc>) {
        let completed_at = Utc::now();
        self.add_entry(ImportHistoryEntry {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            outcome: ImportOutcome::Cancelled,
            started_at,
            completed_at,
            duration_ms: duration_ms(started_at, completed_at),
            total,
            success: 0,
            failed: 0,
            error: None,
        });
    }

    fn add_entry(&self, entry: ImportHistoryEntry) {
        let mut history = self.history.write();

        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }
        history.push_front(entry);

        if let Some(path) = &self.file {
            save_to_disk(path, &history);
        }
    }

    pub fn get_recent(&self, limit: usize) -> ImportHistoryResponse {
        let history = self.history.read();
        ImportHistoryResponse {
            imports: history.iter().take(limit).cloned().collect(),
            total: history.len(),
        }
    }

    pub fn get_by_entity(&self, entity_type: &str, limit: usize) -> ImportHistoryResponse {
        let history = self.history.read();
        let imports: Vec<ImportHistoryEntry> = history
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .take(limit)
            .cloned()
            .collect();
        let total = imports.len();

        ImportHistoryResponse { imports, total }
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }
}

fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

fn load_from_disk(path: &Path) -> Option<Vec<ImportHistoryEntry>> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Vec<ImportHistoryEntry>>(&content) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Failed to parse import history file: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read import history file: {}", e);
            None
        }
    }
}

fn save_to_disk(path: &Path, history: &VecDeque<ImportHistoryEntry>) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create import history directory: {}", e);
            return;
        }
    }
    let entries: Vec<&ImportHistoryEntry> = history.iter().collect();
    match serde_json::to_string_pretty(&entries) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to write import history file: {}", e);
            }
        }
        Err(e) => warn!("Failed to serialize import history: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_record_completed_import() {
        let history = ImportHistory::new();
        let started_at = Utc::now() - chrono::Duration::seconds(2);
        let result = ImportResult::new("clientes", 10, 9, vec![]);

        history.record_completed(&result, started_at);

        let recent = history.get_recent(10);
        assert_eq!(recent.imports.len(), 1);
        assert_eq!(recent.imports[0].id, result.id);
        assert_eq!(recent.imports[0].outcome, ImportOutcome::Completed);
        assert_eq!(recent.imports[0].failed, 1);
        assert!(recent.imports[0].duration_ms >= 2000);
    }

    #[test]
    fn test_record_failed_import() {
        let history = ImportHistory::new();
        let report = FailureReport::new("tarifas", ErrorKind::Timeout, "Tiempo agotado").with_counts(50, 20, 30);

        history.record_failed(&report, Utc::now());

        let recent = history.get_recent(10);
        assert_eq!(recent.imports[0].outcome, ImportOutcome::Failed);
        assert_eq!(recent.imports[0].error.as_deref(), Some("Tiempo agotado"));
        assert_eq!(recent.imports[0].success, 20);
    }

    #[test]
    fn test_history_limit_keeps_newest_first() {
        let history = ImportHistory::new();
        for i in 0..150 {
            history.record_cancelled(&format!("entity-{}", i), i, Utc::now());
        }

        let recent = history.get_recent(200);
        assert_eq!(recent.imports.len(), MAX_HISTORY_SIZE);
        assert_eq!(recent.imports[0].entity_type, "entity-149");
    }

    #[test]
    fn test_get_by_entity() {
        let history = ImportHistory::new();
        history.record_completed(&ImportResult::new("clientes", 1, 1, vec![]), Utc::now());
        history.record_completed(&ImportResult::new("rutas", 1, 1, vec![]), Utc::now());
        history.record_cancelled("clientes", 3, Utc::now());

        let clientes = history.get_by_entity("clientes", 10);
        assert_eq!(clientes.total, 2);
        assert_eq!(clientes.imports[0].outcome, ImportOutcome::Cancelled);
    }

    #[test]
    fn test_history_persists_to_file() {
        let path = std::env::temp_dir().join(format!("import-history-{}.json", Uuid::new_v4()));

        let history = ImportHistory::with_file(&path);
        history.record_completed(&ImportResult::new("clientes", 4, 4, vec![]), Utc::now());
        assert!(path.exists());

        let reloaded = ImportHistory::with_file(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get_recent(1).imports[0].entity_type, "clientes");

        std::fs::remove_file(&path).ok();
    }
}
