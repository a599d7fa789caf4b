//! Import wizard state machine
//!
//! Owns one `ImportState` and is the only place it changes. Each UI action is
//! a method; guards reject invalid transitions without touching the state.
//!
//! Steps: select entity (0) → upload (1) → preview (2) → validate (3) →
//! import (4) → complete (5).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::defaults::{default_import_timeout, DEFAULT_IMPORT_BATCH_SIZE};
use crate::error::WizardError;
use crate::services::catalog::{EntityCatalog, EntityProfile};
use crate::services::collaborators::{
    CatalogTemplateProvider, CsvFileParser, ExportSink, FileParser, ImportBackend, MemoryExportSink, Notification,
    NotificationSeverity, NotificationSink, TemplateProvider, TracingNotifier,
};
use crate::services::correction::CorrectionPlan;
use crate::services::history::ImportHistory;
use crate::services::recovery::{plan_options, RecoveryContext, RecoveryOption, RecoveryPlanner};
use crate::types::{
    CorrectionAction, ErrorKind, FailureReport, ImportOptions, ImportResult, ImportStatistics, RecoveryLogLevel,
    RecoveryOptionId, RecoveryResult, Row, SourceFile, ValidationIssue, ValidationSummary,
};

#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Upper bound for one import-backend call
    pub import_timeout: Duration,
    pub batch_size: Option<usize>,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            import_timeout: default_import_timeout(),
            batch_size: Some(DEFAULT_IMPORT_BATCH_SIZE),
        }
    }
}

/// Serialized as its index (0..=5)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WizardStep {
    #[default]
    SelectEntity,
    Upload,
    Preview,
    Validate,
    Import,
    Complete,
}

impl WizardStep {
    pub const LAST: u8 = 5;

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(WizardStep::SelectEntity),
            1 => Some(WizardStep::Upload),
            2 => Some(WizardStep::Preview),
            3 => Some(WizardStep::Validate),
            4 => Some(WizardStep::Import),
            5 => Some(WizardStep::Complete),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            WizardStep::SelectEntity => "Seleccionar entidad",
            WizardStep::Upload => "Subir archivo",
            WizardStep::Preview => "Vista previa",
            WizardStep::Validate => "Validación",
            WizardStep::Import => "Importación",
            WizardStep::Complete => "Completado",
        }
    }
}

impl From<WizardStep> for u8 {
    fn from(step: WizardStep) -> u8 {
        step.index()
    }
}

impl TryFrom<u8> for WizardStep {
    type Error = String;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        WizardStep::from_index(index).ok_or_else(|| format!("Paso inexistente: {}", index))
    }
}

/// Everything the UI shell reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportState {
    pub step: WizardStep,
    pub entity_type: String,
    pub file_name: Option<String>,
    pub source_rows: Vec<Row>,
    pub validation_issues: Vec<ValidationIssue>,
    pub validation_summary: Option<ValidationSummary>,
    /// Working copy: source rows with pending corrections applied
    pub corrected_rows: Vec<Row>,
    pub pending_corrections: Vec<CorrectionAction>,
    pub is_validating: bool,
    pub is_importing: bool,
    pub auto_correct: bool,
    pub skip_invalid_rows: bool,
    pub result: Option<ImportResult>,
    pub failure: Option<FailureReport>,
    pub error: Option<String>,
    pub import_elapsed: Option<Duration>,
}

impl ImportState {
    pub fn error_count(&self) -> usize {
        self.validation_summary.as_ref().map_or(0, |s| s.total_errors)
    }

    fn has_validated(&self) -> bool {
        self.validation_summary.is_some()
    }
}

pub struct ImportWizard {
    state: ImportState,
    plan: CorrectionPlan,
    /// Rows sent in the latest import call; retries resend them as they were
    sent_rows: Vec<Row>,
    /// Error issues of the rows left out by `skip_invalid_rows`
    skipped_issues: Vec<ValidationIssue>,
    skipped_rows: usize,
    config: WizardConfig,
    catalog: Arc<EntityCatalog>,
    parser: Arc<dyn FileParser>,
    templates: Arc<dyn TemplateProvider>,
    backend: Arc<dyn ImportBackend>,
    notifier: Arc<dyn NotificationSink>,
    export: Arc<dyn ExportSink>,
    history: ImportHistory,
}

impl ImportWizard {
    /// Wizard with CSV parsing, catalog templates and tracing notifications
    pub fn new(catalog: Arc<EntityCatalog>, backend: Arc<dyn ImportBackend>) -> Self {
        Self {
            state: ImportState::default(),
            plan: CorrectionPlan::default(),
            sent_rows: Vec::new(),
            skipped_issues: Vec::new(),
            skipped_rows: 0,
            config: WizardConfig::default(),
            templates: Arc::new(CatalogTemplateProvider::new(catalog.clone())),
            catalog,
            parser: Arc::new(CsvFileParser::new()),
            backend,
            notifier: Arc::new(TracingNotifier),
            export: Arc::new(MemoryExportSink::new()),
            history: ImportHistory::new(),
        }
    }

    pub fn with_config(mut self, config: WizardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn FileParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateProvider>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_export_sink(mut self, export: Arc<dyn ExportSink>) -> Self {
        self.export = export;
        self
    }

    pub fn with_history(mut self, history: ImportHistory) -> Self {
        self.history = history;
        self
    }

    pub fn state(&self) -> &ImportState {
        &self.state
    }

    pub fn history(&self) -> &ImportHistory {
        &self.history
    }

    fn notify(&self, severity: NotificationSeverity, title: &str, message: impl Into<String>) {
        self.notifier.show(Notification::new(severity, title, message));
    }

    fn set_step(&mut self, step: WizardStep) {
        if self.state.step != step {
            debug!("Wizard step {} -> {}", self.state.step.index(), step.index());
            self.state.step = step;
        }
    }

    fn profile(&self) -> Result<EntityProfile, WizardError> {
        self.catalog.get(&self.state.entity_type).cloned().ok_or_else(|| {
            WizardError::Configuration(format!("Tipo de entidad desconocido: '{}'", self.state.entity_type))
        })
    }

    /// Record an action error on the session and tell the user
    fn fail(&mut self, err: WizardError) -> WizardError {
        self.state.error = Some(err.to_string());
        self.notify(NotificationSeverity::Error, "Error", err.to_string());
        err
    }

    fn clear_sent(&mut self) {
        self.sent_rows.clear();
        self.skipped_issues.clear();
        self.skipped_rows = 0;
    }

    /// Count the rows left out of the import call as failed and carry their issues
    fn include_skipped(&self, mut result: ImportResult) -> ImportResult {
        if self.skipped_rows > 0 {
            result.total += self.skipped_rows;
            result.failed += self.skipped_rows;
            result.issues.extend(self.skipped_issues.iter().cloned());
        }
        result
    }

    fn import_options(&self) -> ImportOptions {
        ImportOptions {
            auto_correct: self.state.auto_correct,
            skip_invalid_rows: self.state.skip_invalid_rows,
            batch_size: self.config.batch_size,
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Choose the entity type and move to the upload step.
    /// Picking a different entity drops data loaded for the previous one.
    pub fn select_entity(&mut self, entity_type: &str) -> Result<(), WizardError> {
        let entity_type = entity_type.trim();
        if entity_type.is_empty() {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Upload.index(),
                "No se ha seleccionado un tipo de entidad",
            ));
        }
        if self.state.is_importing {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Upload.index(),
                "Hay una importación en curso",
            ));
        }
        if self.catalog.get(entity_type).is_none() {
            let err = WizardError::Configuration(format!("Tipo de entidad desconocido: '{}'", entity_type));
            return Err(self.fail(err));
        }

        if self.state.entity_type != entity_type {
            let (auto_correct, skip) = (self.state.auto_correct, self.state.skip_invalid_rows);
            self.state = ImportState {
                entity_type: entity_type.to_string(),
                auto_correct,
                skip_invalid_rows: skip,
                ..ImportState::default()
            };
            self.plan = CorrectionPlan::default();
            self.clear_sent();
        }
        self.state.error = None;
        info!("Import wizard entity selected: {}", entity_type);
        self.set_step(WizardStep::Upload);
        Ok(())
    }

    /// Parse `file` into rows and move to the preview step
    pub async fn upload_file(&mut self, file: SourceFile) -> Result<usize, WizardError> {
        if self.state.step < WizardStep::Upload || self.state.entity_type.is_empty() {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Preview.index(),
                "Seleccione primero un tipo de entidad",
            ));
        }
        if self.state.is_validating || self.state.is_importing {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Preview.index(),
                "Hay una operación en curso",
            ));
        }
        let profile = self.profile().map_err(|e| self.fail(e))?;

        let parsed = self.parser.parse(&file, profile.columns()).await;
        let rows = match parsed {
            Ok(rows) if rows.is_empty() => {
                return Err(self.fail(WizardError::Parse(format!("{} no contiene filas", file.name))));
            }
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e)),
        };

        let count = rows.len();
        info!("Uploaded {} with {} rows for {}", file.name, count, self.state.entity_type);

        self.plan = CorrectionPlan::default();
        self.clear_sent();
        self.state.file_name = Some(file.name);
        self.state.corrected_rows = rows.clone();
        self.state.source_rows = rows;
        self.state.pending_corrections.clear();
        self.state.validation_issues.clear();
        self.state.validation_summary = None;
        self.state.result = None;
        self.state.failure = None;
        self.state.error = None;
        self.state.import_elapsed = None;
        self.set_step(WizardStep::Preview);
        Ok(count)
    }

    /// Validate the working copy and move to the validation step.
    /// Ignored while another validation or an import is running.
    pub async fn validate(&mut self) -> Result<ValidationSummary, WizardError> {
        if self.state.is_validating || self.state.is_importing {
            warn!("Validation requested while another operation is running; ignored");
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Validate.index(),
                "Hay una operación en curso",
            ));
        }
        if self.state.source_rows.is_empty() {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Validate.index(),
                "No hay datos cargados",
            ));
        }
        let profile = self.profile().map_err(|e| self.fail(e))?;

        self.state.is_validating = true;
        let engine = profile.validation_engine();
        let rows = self.state.corrected_rows.clone();
        let columns = profile.columns().to_vec();
        let outcome = tokio::task::spawn_blocking(move || engine.validate(&rows, &columns)).await;
        self.state.is_validating = false;

        let report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(rule_error)) => return Err(self.fail(rule_error.into())),
            Err(join_error) => return Err(self.fail(WizardError::Internal(join_error.to_string()))),
        };

        let summary = report.summary.clone();
        info!(
            "Validation of {} rows: {} errors, {} warnings",
            summary.total_rows, summary.total_errors, summary.total_warnings
        );
        if summary.has_errors() {
            self.notify(
                NotificationSeverity::Warning,
                "Validación",
                format!("{} errores en {} filas", summary.total_errors, summary.rows_with_errors),
            );
        } else {
            self.notify(NotificationSeverity::Success, "Validación", "Todos los datos son válidos");
        }

        self.state.corrected_rows = report.annotate(&self.state.corrected_rows);
        self.state.validation_issues = report.issues;
        self.state.validation_summary = Some(summary.clone());
        self.state.error = None;
        self.set_step(WizardStep::Validate);
        Ok(summary)
    }

    /// Rebuild the working copy from the source rows and the correction plan,
    /// re-running validation when it already ran
    fn recompute(&mut self) -> Result<(), WizardError> {
        let profile = self.profile()?;
        let rows = profile.correction_engine().apply_plan(&self.state.source_rows, &self.plan);
        self.state.pending_corrections = self.plan.to_actions();

        if self.state.has_validated() {
            let report = profile.validation_engine().validate(&rows, profile.columns())?;
            self.state.corrected_rows = report.annotate(&rows);
            self.state.validation_issues = report.issues;
            self.state.validation_summary = Some(report.summary);
        } else {
            self.state.corrected_rows = rows;
        }
        Ok(())
    }

    /// Add one pending correction; the working copy and issues are recomputed
    pub fn apply_correction(&mut self, action: CorrectionAction) -> Result<(), WizardError> {
        if self.state.source_rows.is_empty() || self.state.is_importing {
            return Err(WizardError::rejected(
                self.state.step.index(),
                self.state.step.index(),
                "No hay datos que corregir",
            ));
        }
        debug!("Correction queued: {:?}", action);
        self.plan.push(action);
        self.recompute().map_err(|e| self.fail(e))
    }

    /// Apply every auto-fix the registered fixers propose; returns how many
    pub fn auto_fix(&mut self) -> Result<usize, WizardError> {
        if self.state.source_rows.is_empty() || self.state.is_importing {
            return Err(WizardError::rejected(
                self.state.step.index(),
                self.state.step.index(),
                "No hay datos que corregir",
            ));
        }
        let profile = self.profile().map_err(|e| self.fail(e))?;
        let actions = profile
            .correction_engine()
            .auto_fix(&self.state.corrected_rows, &self.state.validation_issues);
        let count = actions.len();
        if count == 0 {
            self.notify(NotificationSeverity::Info, "Corrección automática", "No hay correcciones automáticas");
            return Ok(0);
        }
        for action in actions {
            self.plan.push(action);
        }
        self.recompute().map_err(|e| self.fail(e))?;
        self.notify(
            NotificationSeverity::Success,
            "Corrección automática",
            format!("{} correcciones aplicadas", count),
        );
        Ok(count)
    }

    pub fn set_skip_invalid_rows(&mut self, skip: bool) {
        self.state.skip_invalid_rows = skip;
    }

    pub fn set_auto_correct(&mut self, auto_correct: bool) {
        self.state.auto_correct = auto_correct;
    }

    /// Validation ran and either found no errors or invalid rows are skipped
    pub fn can_import(&self) -> bool {
        self.state.has_validated()
            && !self.state.is_importing
            && (self.state.error_count() == 0 || self.state.skip_invalid_rows)
    }

    /// Rows the next import call would send, plus the error issues of the
    /// rows it leaves out
    fn rows_to_import(&self) -> (Vec<Row>, Vec<ValidationIssue>) {
        if !self.state.skip_invalid_rows {
            return (self.state.corrected_rows.clone(), Vec::new());
        }
        let skipped: Vec<ValidationIssue> = self
            .state
            .validation_issues
            .iter()
            .filter(|i| i.is_error())
            .cloned()
            .collect();
        let invalid: BTreeSet<usize> = skipped.iter().map(|i| i.row).collect();
        let rows = self
            .state
            .corrected_rows
            .iter()
            .filter(|r| !invalid.contains(&r.row_index))
            .cloned()
            .collect();
        (rows, skipped)
    }

    /// Send the working copy to the import backend.
    ///
    /// Blocked by error issues unless invalid rows are skipped. On success the
    /// wizard completes; on failure it stays on the import step with `error`
    /// and `failure` set. Cancelling leaves the step as it was.
    pub async fn start_import(&mut self, cancel: &CancellationToken) -> Result<ImportResult, WizardError> {
        let from = self.state.step.index();
        if self.state.is_importing {
            warn!("Import requested while another import is running; ignored");
            return Err(WizardError::rejected(from, WizardStep::Import.index(), "Hay una importación en curso"));
        }
        if !matches!(self.state.step, WizardStep::Validate | WizardStep::Import) || !self.state.has_validated() {
            return Err(WizardError::rejected(
                from,
                WizardStep::Import.index(),
                "Valide los datos antes de importar",
            ));
        }

        if self.state.auto_correct {
            self.auto_fix()?;
        }

        let errors = self.state.error_count();
        if errors > 0 && !self.state.skip_invalid_rows {
            let err = WizardError::Validation { errors };
            self.notify(NotificationSeverity::Warning, "Importación bloqueada", err.to_string());
            return Err(err);
        }

        let (rows, skipped_issues) = self.rows_to_import();
        if rows.is_empty() {
            return Err(WizardError::rejected(
                from,
                WizardStep::Import.index(),
                "No hay filas válidas para importar",
            ));
        }
        self.skipped_rows = self.state.corrected_rows.len() - rows.len();
        if self.skipped_rows > 0 {
            info!("Leaving {} invalid rows out of the import", self.skipped_rows);
        }
        self.skipped_issues = skipped_issues;
        self.sent_rows = rows.clone();
        self.run_import(rows, cancel).await
    }

    /// Resend the rows of the failed import without validating again
    pub async fn retry_import(&mut self, cancel: &CancellationToken) -> Result<ImportResult, WizardError> {
        if self.state.is_importing || self.state.step != WizardStep::Import || self.state.failure.is_none() {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Import.index(),
                "No hay una importación fallida que reintentar",
            ));
        }
        info!("Retrying import of {} rows", self.sent_rows.len());
        let rows = self.sent_rows.clone();
        self.run_import(rows, cancel).await
    }

    async fn run_import(&mut self, rows: Vec<Row>, cancel: &CancellationToken) -> Result<ImportResult, WizardError> {
        let previous_step = self.state.step;
        let entity_type = self.state.entity_type.clone();
        let total = rows.len();
        let options = self.import_options();
        let backend = self.backend.clone();
        let timeout = self.config.import_timeout;

        self.state.is_importing = true;
        self.state.error = None;
        self.set_step(WizardStep::Import);
        info!(
            "Importing {} {} rows via {} backend (timeout {:?})",
            total,
            entity_type,
            backend.name(),
            timeout
        );

        let started = Instant::now();
        let started_at = Utc::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, backend.process(&entity_type, rows, &options)) => Some(result),
        };
        self.state.is_importing = false;

        match outcome {
            None => {
                info!("Import of {} cancelled by user", entity_type);
                self.set_step(previous_step);
                self.history.record_cancelled(&entity_type, total, started_at);
                self.notify(NotificationSeverity::Info, "Importación", "Importación cancelada");
                Err(WizardError::Cancelled)
            }
            Some(Err(_elapsed)) => {
                let report = FailureReport::new(
                    &entity_type,
                    ErrorKind::Timeout,
                    format!("Sin respuesta tras {} segundos", timeout.as_secs_f64()),
                )
                .with_counts(total, 0, total)
                .with_failed_rows(self.sent_rows.clone());
                Err(self.import_failed(report, started_at))
            }
            Some(Ok(Err(report))) => Err(self.import_failed(report, started_at)),
            Some(Ok(Ok(result))) => {
                let result = self.include_skipped(result);
                self.import_succeeded(result.clone(), started.elapsed(), started_at);
                Ok(result)
            }
        }
    }

    fn import_failed(&mut self, report: FailureReport, started_at: DateTime<Utc>) -> WizardError {
        warn!("Import of {} failed: {}", report.entity_type, report);
        self.history.record_failed(&report, started_at);
        self.state.error = Some(report.to_string());
        self.notify(NotificationSeverity::Error, "Importación fallida", report.message.clone());
        self.state.failure = Some(report.clone());
        WizardError::from(report)
    }

    fn import_succeeded(&mut self, result: ImportResult, elapsed: Duration, started_at: DateTime<Utc>) {
        info!(
            "Import of {} completed: {}/{} rows in {:?}",
            result.entity_type, result.success, result.total, elapsed
        );
        self.history.record_completed(&result, started_at);
        self.notify(
            NotificationSeverity::Success,
            "Importación completada",
            format!("{} de {} registros importados", result.success, result.total),
        );
        self.state.result = Some(result);
        self.state.failure = None;
        self.state.error = None;
        self.state.import_elapsed = Some(elapsed);
        self.set_step(WizardStep::Complete);
    }

    /// Back to the initial state
    pub fn reset(&mut self) {
        info!("Import wizard reset");
        self.state = ImportState::default();
        self.plan = CorrectionPlan::default();
        self.clear_sent();
    }

    /// Navigate to step `n`.
    ///
    /// Going back is always allowed and keeps everything entered so far.
    /// Going forward is limited to steps whose data already exists; the
    /// import and complete steps are only reached through the import actions.
    pub fn go_to_step(&mut self, n: u8) -> Result<(), WizardError> {
        let from = self.state.step.index();
        let target = WizardStep::from_index(n).ok_or_else(|| WizardError::rejected(from, n, "Paso inexistente"))?;

        if self.state.is_validating || self.state.is_importing {
            return Err(WizardError::rejected(from, n, "Hay una operación en curso"));
        }
        if target <= self.state.step {
            self.set_step(target);
            return Ok(());
        }

        let guard = match target {
            WizardStep::SelectEntity => None,
            WizardStep::Upload => self
                .state
                .entity_type
                .is_empty()
                .then_some("No se ha seleccionado un tipo de entidad"),
            WizardStep::Preview => self.state.source_rows.is_empty().then_some("No se ha cargado ningún archivo"),
            WizardStep::Validate => (!self.state.has_validated()).then_some("Los datos no se han validado"),
            WizardStep::Import | WizardStep::Complete => Some("Use la acción de importar"),
        };
        if let Some(reason) = guard {
            debug!("Step {} -> {} rejected: {}", from, n, reason);
            return Err(WizardError::rejected(from, n, reason));
        }
        self.set_step(target);
        Ok(())
    }

    pub async fn download_template(&self) -> Result<SourceFile, WizardError> {
        if self.state.entity_type.is_empty() {
            return Err(WizardError::Configuration("No se ha seleccionado un tipo de entidad".to_string()));
        }
        self.templates.get_template(&self.state.entity_type).await.map_err(|e| {
            self.notify(NotificationSeverity::Error, "Plantilla", e.to_string());
            e
        })
    }

    /// Percentage of the wizard completed
    pub fn progress(&self) -> f64 {
        self.state.step.index() as f64 * 100.0 / WizardStep::LAST as f64
    }

    pub fn statistics(&self) -> Option<ImportStatistics> {
        let result = self.state.result.as_ref()?;
        Some(ImportStatistics::from_result(
            result,
            self.state.import_elapsed.unwrap_or_default(),
        ))
    }

    /// Recovery strategies for the current failure; empty when nothing failed
    pub fn recovery_options(&self) -> Vec<RecoveryOption> {
        self.state.failure.as_ref().map(plan_options).unwrap_or_default()
    }

    /// Run the selected recovery strategies against the current failure.
    /// When nothing is left to recover the wizard completes with a new result.
    pub async fn recover(&mut self, selected: &[RecoveryOptionId]) -> Result<RecoveryResult, WizardError> {
        let Some(failure) = self.state.failure.clone() else {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Complete.index(),
                "No hay una importación fallida",
            ));
        };
        if self.state.is_importing {
            return Err(WizardError::rejected(
                self.state.step.index(),
                WizardStep::Complete.index(),
                "Hay una importación en curso",
            ));
        }
        let profile = self.profile().map_err(|e| self.fail(e))?;
        let planner = RecoveryPlanner::standard(RecoveryContext {
            entity_type: self.state.entity_type.clone(),
            rows: self.sent_rows.clone(),
            columns: profile.columns().to_vec(),
            options: self.import_options(),
            validation: profile.validation_engine(),
            correction: profile.correction_engine(),
            backend: self.backend.clone(),
            export: self.export.clone(),
        });

        self.state.is_importing = true;
        let started = Instant::now();
        let started_at = Utc::now();
        let outcome = planner.execute(selected, &failure).await;
        self.state.is_importing = false;

        let recovered_everything = outcome.remaining_errors == 0
            && outcome.errors().next().is_none()
            && outcome.logs.iter().any(|l| l.level == RecoveryLogLevel::Success);
        if recovered_everything {
            let total = failure.total_records;
            let result = self.include_skipped(ImportResult::new(&failure.entity_type, total, total, Vec::new()));
            self.import_succeeded(result, started.elapsed(), started_at);
        } else {
            self.notify(
                NotificationSeverity::Warning,
                "Recuperación",
                format!(
                    "{} registros recuperados, {} con errores",
                    outcome.recovered_records, outcome.remaining_errors
                ),
            );
        }
        Ok(outcome)
    }
}
