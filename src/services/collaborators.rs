//! External collaborators of the import wizard
//!
//! The wizard only sees these traits:
//! - `FileParser` turns an uploaded file into rows
//! - `TemplateProvider` hands out a downloadable template
//! - `ImportBackend` persists rows and may fail with a `FailureReport`
//! - `NotificationSink` shows fire-and-forget feedback
//! - `ExportSink` receives exported failed rows
//!
//! `CsvFileParser`, `CatalogTemplateProvider` and `TracingNotifier` are the
//! default implementations; `MockImportBackend`, `MemoryExportSink` and
//! `MemoryNotifier` are deterministic stand-ins for tests and the CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::WizardError;
use crate::services::catalog::EntityCatalog;
use crate::types::{
    ColumnRule, ColumnType, ErrorKind, FailureReport, ImportOptions, ImportResult, Row, ScalarValue, SourceFile,
};

/// Parses an uploaded spreadsheet into rows
#[async_trait]
pub trait FileParser: Send + Sync {
    async fn parse(&self, file: &SourceFile, columns: &[ColumnRule]) -> Result<Vec<Row>, WizardError>;

    fn name(&self) -> &'static str;
}

/// Supplies the downloadable template of an entity type
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn get_template(&self, entity_type: &str) -> Result<SourceFile, WizardError>;
}

/// Persists imported rows
#[async_trait]
pub trait ImportBackend: Send + Sync {
    async fn process(
        &self,
        entity_type: &str,
        rows: Vec<Row>,
        options: &ImportOptions,
    ) -> Result<ImportResult, FailureReport>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: NotificationSeverity,
}

impl Notification {
    pub fn new(severity: NotificationSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }
}

/// Fire-and-forget user feedback; callers never wait on it
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: Notification);
}

/// Receives exported files (failed rows)
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn export(&self, file_name: &str, content: Vec<u8>) -> Result<(), String>;
}

// ============================================================================
// File parsing
// ============================================================================

/// `;` or `,` separated CSV with a header row
#[derive(Debug, Clone, Default)]
pub struct CsvFileParser;

impl CsvFileParser {
    pub fn new() -> Self {
        Self
    }

    /// Pick the delimiter that occurs most in the header line
    fn detect_delimiter(content: &str) -> u8 {
        let header = content.lines().next().unwrap_or_default();
        let semicolons = header.matches(';').count();
        let commas = header.matches(',').count();
        if semicolons >= commas && semicolons > 0 {
            b';'
        } else {
            b','
        }
    }

    /// Map a header cell to a column key, matching key or label case-insensitively
    fn column_key(header: &str, columns: &[ColumnRule]) -> String {
        let trimmed = header.trim();
        columns
            .iter()
            .find(|c| c.key.eq_ignore_ascii_case(trimmed) || c.label.eq_ignore_ascii_case(trimmed))
            .map(|c| c.key.clone())
            .unwrap_or_else(|| trimmed.to_string())
    }

    fn cell_value(raw: &str, column_type: Option<ColumnType>) -> ScalarValue {
        let value = ScalarValue::text(raw);
        if value.is_empty() {
            return ScalarValue::Empty;
        }
        match column_type {
            Some(ColumnType::Text) | None => value,
            // Kept as text when it does not convert, so validation can report it
            Some(ty) => value.coerce(ty).unwrap_or(value),
        }
    }

    pub fn parse_content(content: &str, columns: &[ColumnRule]) -> Result<Vec<Row>, WizardError> {
        let content = content.trim_start_matches('\u{feff}');
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(Self::detect_delimiter(content))
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| WizardError::Parse(e.to_string()))?
            .iter()
            .map(|h| Self::column_key(h, columns))
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(WizardError::Parse("El archivo no tiene cabecera".to_string()));
        }

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| WizardError::Parse(format!("Fila {}: {}", i + 1, e)))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let mut row = Row::new(i + 1);
            for (header, cell) in headers.iter().zip(record.iter()) {
                if header.is_empty() {
                    continue;
                }
                let column_type = columns.iter().find(|c| &c.key == header).map(|c| c.column_type);
                row.set(header.clone(), Self::cell_value(cell, column_type));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl FileParser for CsvFileParser {
    async fn parse(&self, file: &SourceFile, columns: &[ColumnRule]) -> Result<Vec<Row>, WizardError> {
        let lower = file.name.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            return Err(WizardError::Parse(format!(
                "Formato no soportado: {}. Exporte la hoja como CSV",
                file.name
            )));
        }
        let content = String::from_utf8(file.content.clone())
            .map_err(|_| WizardError::Parse(format!("{} no es texto UTF-8", file.name)))?;
        let rows = Self::parse_content(&content, columns)?;
        debug!("Parsed {} rows from {}", rows.len(), file.name);
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

// ============================================================================
// Templates
// ============================================================================

/// CSV template built from the entity catalog: header plus one example row
#[derive(Debug, Clone)]
pub struct CatalogTemplateProvider {
    catalog: Arc<EntityCatalog>,
}

impl CatalogTemplateProvider {
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        Self { catalog }
    }

    fn example_value(column: &ColumnRule) -> String {
        match column.column_type {
            ColumnType::Number => "0".to_string(),
            ColumnType::Date => "2025-01-01".to_string(),
            ColumnType::Boolean => "si".to_string(),
            ColumnType::Text if column.key.contains("email") => "nombre@empresa.com".to_string(),
            ColumnType::Text => column.label.clone(),
        }
    }
}

#[async_trait]
impl TemplateProvider for CatalogTemplateProvider {
    async fn get_template(&self, entity_type: &str) -> Result<SourceFile, WizardError> {
        let profile = self
            .catalog
            .get(entity_type)
            .ok_or_else(|| WizardError::Configuration(format!("Plantilla no disponible para '{}'", entity_type)))?;

        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());
        let columns = profile.columns();
        writer
            .write_record(columns.iter().map(|c| c.key.as_str()))
            .map_err(|e| WizardError::Internal(e.to_string()))?;
        writer
            .write_record(columns.iter().map(Self::example_value))
            .map_err(|e| WizardError::Internal(e.to_string()))?;
        let content = writer.into_inner().map_err(|e| WizardError::Internal(e.to_string()))?;

        Ok(SourceFile::new(format!("plantilla_{}.csv", entity_type), content))
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Logs notifications at the matching tracing level
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn show(&self, n: Notification) {
        match n.severity {
            NotificationSeverity::Info | NotificationSeverity::Success => info!("{}: {}", n.title, n.message),
            NotificationSeverity::Warning => warn!("{}: {}", n.title, n.message),
            NotificationSeverity::Error => error!("{}: {}", n.title, n.message),
        }
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().clone()
    }
}

impl NotificationSink for MemoryNotifier {
    fn show(&self, notification: Notification) {
        self.shown.lock().push(notification);
    }
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryExportSink {
    files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().clone()
    }
}

#[async_trait]
impl ExportSink for MemoryExportSink {
    async fn export(&self, file_name: &str, content: Vec<u8>) -> Result<(), String> {
        self.files.lock().push((file_name.to_string(), content));
        Ok(())
    }
}

/// Writes exported files into a directory
#[derive(Debug, Clone)]
pub struct DirectoryExportSink {
    dir: PathBuf,
}

impl DirectoryExportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ExportSink for DirectoryExportSink {
    async fn export(&self, file_name: &str, content: Vec<u8>) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| e.to_string())?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, content).await.map_err(|e| e.to_string())?;
        info!("Exported {}", path.display());
        Ok(())
    }
}

// ============================================================================
// Mock import backend
// ============================================================================

/// Deterministic import backend.
///
/// Succeeds by default. `failing(times, after_rows, kind)` makes the next
/// `times` calls fail once `after_rows` rows went through, reporting the
/// checkpoint and the rows that were not processed.
#[derive(Debug)]
pub struct MockImportBackend {
    failures_remaining: Mutex<usize>,
    fail_after_rows: usize,
    error_kind: ErrorKind,
    delay: Option<Duration>,
    received: Mutex<Vec<Vec<Row>>>,
}

impl Default for MockImportBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImportBackend {
    pub fn new() -> Self {
        Self {
            failures_remaining: Mutex::new(0),
            fail_after_rows: 0,
            error_kind: ErrorKind::Server,
            delay: None,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, times: usize, after_rows: usize, kind: ErrorKind) -> Self {
        self.failures_remaining = Mutex::new(times);
        self.fail_after_rows = after_rows;
        self.error_kind = kind;
        self
    }

    /// Sleep before answering; used to exercise timeouts and cancellation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.received.lock().len()
    }

    /// Row sets received, one entry per call
    pub fn received(&self) -> Vec<Vec<Row>> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ImportBackend for MockImportBackend {
    async fn process(
        &self,
        entity_type: &str,
        rows: Vec<Row>,
        options: &ImportOptions,
    ) -> Result<ImportResult, FailureReport> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.received.lock().push(rows.clone());

        let should_fail = {
            let mut remaining = self.failures_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        };

        let total = rows.len();
        if should_fail {
            let processed = self.fail_after_rows.min(total);
            let last_good = processed.checked_sub(1).map(|i| rows[i].row_index);
            let failed_rows = rows[processed..].to_vec();
            warn!("Mock backend failing after {} of {} rows", processed, total);
            return Err(FailureReport::new(entity_type, self.error_kind, "Error simulado del servidor")
                .with_counts(total, processed, total - processed)
                .with_checkpoint(last_good)
                .with_failed_rows(failed_rows));
        }

        debug!(
            "Mock backend imported {} {} rows (batch size {:?})",
            total, entity_type, options.batch_size
        );
        Ok(ImportResult::new(entity_type, total, total, Vec::new()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::default_catalog;
    use chrono::NaiveDate;
    use tokio_test::{assert_err, assert_ok};

    fn clientes_columns() -> Vec<ColumnRule> {
        default_catalog().get("clientes").unwrap().columns().to_vec()
    }

    #[tokio::test]
    async fn test_csv_parser_detects_semicolon_and_coerces_types() {
        let content = "codigo;Nombre;email;fecha_alta;activo\nC1;Ruiz;a@b.com;2024-03-01;si\nC2;Paz;c@d.com;ayer;no\n";
        let file = SourceFile::new("clientes.csv", content);

        let rows = assert_ok!(CsvFileParser::new().parse(&file, &clientes_columns()).await);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index, 1);
        assert_eq!(rows[0].get("nombre"), &ScalarValue::text("Ruiz"));
        assert_eq!(
            rows[0].get("fecha_alta"),
            &ScalarValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(rows[0].get("activo"), &ScalarValue::Bool(true));
        // Unconvertible cells stay text for validation to report
        assert_eq!(rows[1].get("fecha_alta"), &ScalarValue::text("ayer"));
    }

    #[tokio::test]
    async fn test_csv_parser_handles_commas_and_empty_cells() {
        let content = "codigo,nombre,email\nC1,,a@b.com\n,,\nC3,Sol,\n";
        let rows = CsvFileParser::parse_content(content, &clientes_columns()).unwrap();

        assert_eq!(rows.len(), 2, "blank lines are skipped");
        assert_eq!(rows[0].get("nombre"), &ScalarValue::Empty);
        assert_eq!(rows[1].row_index, 3);
        assert_eq!(rows[1].get("email"), &ScalarValue::Empty);
    }

    #[tokio::test]
    async fn test_csv_parser_rejects_xlsx() {
        let file = SourceFile::new("clientes.xlsx", vec![0x50, 0x4b]);
        let err = assert_err!(CsvFileParser::new().parse(&file, &[]).await);
        assert!(matches!(err, WizardError::Parse(_)));
    }

    #[tokio::test]
    async fn test_template_contains_header_and_example_row() {
        let provider = CatalogTemplateProvider::new(Arc::new(default_catalog()));
        let file = provider.get_template("clientes").await.unwrap();
        let text = String::from_utf8(file.content).unwrap();
        let mut lines = text.lines();

        assert_eq!(file.name, "plantilla_clientes.csv");
        assert_eq!(lines.next(), Some("codigo;nombre;email;telefono;fecha_alta;activo"));
        assert!(lines.next().unwrap().contains("nombre@empresa.com"));

        // The template parses back into a valid row
        let rows = CsvFileParser::parse_content(&text, &clientes_columns()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_template_for_unknown_entity_is_configuration_error() {
        let provider = CatalogTemplateProvider::new(Arc::new(default_catalog()));
        let err = provider.get_template("facturas").await.unwrap_err();
        assert!(matches!(err, WizardError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_mock_backend_fails_then_succeeds() {
        let backend = MockImportBackend::new().failing(1, 2, ErrorKind::Network);
        let rows: Vec<Row> = (1..=5).map(|i| Row::new(i).with("codigo", format!("C{}", i))).collect();
        let options = ImportOptions::default();

        let report = backend.process("clientes", rows.clone(), &options).await.unwrap_err();
        assert_eq!(report.error_kind, ErrorKind::Network);
        assert_eq!(report.processed_records, 2);
        assert_eq!(report.failed_records, 3);
        assert_eq!(report.last_good_row_index, Some(2));
        assert_eq!(report.failed_rows().len(), 3);
        assert_eq!(report.failed_rows()[0].row_index, 3);

        let result = backend.process("clientes", rows, &options).await.unwrap();
        assert_eq!(result.success, 5);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_failing_immediately_has_no_checkpoint() {
        let backend = MockImportBackend::new().failing(1, 0, ErrorKind::Server);
        let report = backend
            .process("clientes", vec![Row::new(1)], &ImportOptions::default())
            .await
            .unwrap_err();
        assert_eq!(report.last_good_row_index, None);
    }

    #[test]
    fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier.show(Notification::new(NotificationSeverity::Success, "Importación", "ok"));
        assert_eq!(notifier.shown().len(), 1);
        TracingNotifier.show(Notification::new(NotificationSeverity::Error, "x", "y"));
    }
}
