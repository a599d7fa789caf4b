//! Recovery planner
//!
//! After a failed import, `plan_options` lists the five recovery strategies
//! with their applicability for that failure. `execute` runs the selected
//! ones one after the other, logging each step. A failing step is logged and
//! the run continues with the next one.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RecoveryError;
use crate::services::collaborators::{ExportSink, ImportBackend};
use crate::services::correction::CorrectionEngine;
use crate::services::validation::ValidationEngine;
use crate::types::{
    ColumnRule, ErrorKind, FailureReport, ImportOptions, RecoveryLogEntry, RecoveryOptionId, RecoveryResult, Row,
};

/// A recovery strategy and whether it applies to a given failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOption {
    pub id: RecoveryOptionId,
    pub name: String,
    pub is_applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Applicability of every strategy for `failure`; pure
pub fn plan_options(failure: &FailureReport) -> Vec<RecoveryOption> {
    RecoveryOptionId::ALL
        .into_iter()
        .map(|id| {
            let reason = match id {
                RecoveryOptionId::RetryAll => None,
                RecoveryOptionId::RetryCheckpoint => match failure.last_good_row_index {
                    Some(index) if index > 0 => None,
                    _ => Some("No hay un punto de control disponible".to_string()),
                },
                RecoveryOptionId::RetryFailed | RecoveryOptionId::ExportFailed => {
                    if failure.failed_rows().is_empty() {
                        Some("El error no incluye registros fallidos".to_string())
                    } else {
                        None
                    }
                }
                RecoveryOptionId::AutoFix => {
                    if failure.error_kind == ErrorKind::Validation {
                        None
                    } else {
                        Some("Solo aplica a errores de validación".to_string())
                    }
                }
            };
            RecoveryOption {
                id,
                name: id.display_name().to_string(),
                is_applicable: reason.is_none(),
                reason,
            }
        })
        .collect()
}

/// What a successful step achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub recovered: usize,
    pub message: String,
}

/// One runnable recovery strategy
#[async_trait]
pub trait RecoveryStep: Send + Sync {
    async fn run(&self, failure: &FailureReport) -> Result<StepOutcome, RecoveryError>;
}

/// Everything the built-in steps need to act on a failure
#[derive(Clone)]
pub struct RecoveryContext {
    pub entity_type: String,
    /// Rows sent in the failed import call
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnRule>,
    pub options: ImportOptions,
    pub validation: ValidationEngine,
    pub correction: CorrectionEngine,
    pub backend: Arc<dyn ImportBackend>,
    pub export: Arc<dyn ExportSink>,
}

impl RecoveryContext {
    async fn reimport(&self, rows: Vec<Row>, what: &str) -> Result<usize, RecoveryError> {
        if rows.is_empty() {
            return Err(RecoveryError::NothingToProcess(what.to_string()));
        }
        let result = self.backend.process(&self.entity_type, rows, &self.options).await?;
        Ok(result.success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryScope {
    All,
    Checkpoint,
    Failed,
}

struct RetryStep {
    ctx: Arc<RecoveryContext>,
    scope: RetryScope,
}

#[async_trait]
impl RecoveryStep for RetryStep {
    async fn run(&self, failure: &FailureReport) -> Result<StepOutcome, RecoveryError> {
        let (rows, what) = match self.scope {
            RetryScope::All => (self.ctx.rows.clone(), "reintentar"),
            RetryScope::Checkpoint => {
                let checkpoint = failure.last_good_row_index.unwrap_or(0);
                let rows = self
                    .ctx
                    .rows
                    .iter()
                    .filter(|r| r.row_index > checkpoint)
                    .cloned()
                    .collect();
                (rows, "reintentar desde el punto de control")
            }
            RetryScope::Failed => (failure.failed_rows().to_vec(), "reintentar los fallidos"),
        };
        let sent = rows.len();
        let success = self.ctx.reimport(rows, what).await?;
        let recovered = match self.scope {
            RetryScope::Failed => success,
            RetryScope::All | RetryScope::Checkpoint => success.min(failure.failed_records),
        };
        Ok(StepOutcome {
            recovered,
            message: format!("{} de {} registros importados", success, sent),
        })
    }
}

struct ExportFailedStep {
    ctx: Arc<RecoveryContext>,
}

#[async_trait]
impl RecoveryStep for ExportFailedStep {
    async fn run(&self, failure: &FailureReport) -> Result<StepOutcome, RecoveryError> {
        let rows = failure.failed_rows();
        if rows.is_empty() {
            return Err(RecoveryError::NothingToProcess("exportar".to_string()));
        }
        let content = failed_rows_csv(rows).map_err(|e| RecoveryError::Export(e.to_string()))?;
        let file_name = format!(
            "fallidos_{}_{}.csv",
            self.ctx.entity_type,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        self.ctx
            .export
            .export(&file_name, content)
            .await
            .map_err(RecoveryError::Export)?;
        Ok(StepOutcome {
            recovered: 0,
            message: format!("{} registros exportados a {}", rows.len(), file_name),
        })
    }
}

struct AutoFixStep {
    ctx: Arc<RecoveryContext>,
}

#[async_trait]
impl RecoveryStep for AutoFixStep {
    async fn run(&self, failure: &FailureReport) -> Result<StepOutcome, RecoveryError> {
        let id = RecoveryOptionId::AutoFix.to_string();
        let rows = if failure.failed_rows().is_empty() {
            self.ctx.rows.as_slice()
        } else {
            failure.failed_rows()
        };
        let report = self
            .ctx
            .validation
            .validate(rows, &self.ctx.columns)
            .map_err(|e| RecoveryError::NotApplicable(id.clone(), e.to_string()))?;
        let actions = self.ctx.correction.auto_fix(rows, &report.issues);
        if actions.is_empty() {
            return Err(RecoveryError::NotApplicable(
                id,
                "ninguna corrección automática aplicable".to_string(),
            ));
        }
        let fixed = self.ctx.correction.apply_corrections(rows, &actions);
        let success = self.ctx.reimport(fixed, "corregir").await?;
        Ok(StepOutcome {
            recovered: success,
            message: format!("{} correcciones aplicadas, {} registros importados", actions.len(), success),
        })
    }
}

/// Serialize rows as `;` separated CSV with a `fila` column first
pub fn failed_rows_csv(rows: &[Row]) -> Result<Vec<u8>, csv::Error> {
    let fields: BTreeSet<&str> = rows.iter().flat_map(|r| r.values.keys().map(String::as_str)).collect();
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());

    writer.write_record(std::iter::once("fila").chain(fields.iter().copied()))?;
    for row in rows {
        let mut record = vec![row.row_index.to_string()];
        record.extend(fields.iter().map(|f| row.get(f).to_string()));
        writer.write_record(&record)?;
    }
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Runs recovery strategies against a failure report
#[derive(Clone, Default)]
pub struct RecoveryPlanner {
    steps: HashMap<RecoveryOptionId, Arc<dyn RecoveryStep>>,
}

impl RecoveryPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner with the five built-in strategies acting on `ctx`
    pub fn standard(ctx: RecoveryContext) -> Self {
        let ctx = Arc::new(ctx);
        Self::new()
            .with_step(
                RecoveryOptionId::RetryAll,
                RetryStep {
                    ctx: ctx.clone(),
                    scope: RetryScope::All,
                },
            )
            .with_step(
                RecoveryOptionId::RetryCheckpoint,
                RetryStep {
                    ctx: ctx.clone(),
                    scope: RetryScope::Checkpoint,
                },
            )
            .with_step(
                RecoveryOptionId::RetryFailed,
                RetryStep {
                    ctx: ctx.clone(),
                    scope: RetryScope::Failed,
                },
            )
            .with_step(RecoveryOptionId::ExportFailed, ExportFailedStep { ctx: ctx.clone() })
            .with_step(RecoveryOptionId::AutoFix, AutoFixStep { ctx })
    }

    pub fn with_step(mut self, id: RecoveryOptionId, step: impl RecoveryStep + 'static) -> Self {
        self.steps.insert(id, Arc::new(step));
        self
    }

    pub fn plan_options(&self, failure: &FailureReport) -> Vec<RecoveryOption> {
        plan_options(failure)
    }

    /// Run `selected` in order, each awaited before the next starts.
    ///
    /// Options that are not applicable are skipped with a warning entry;
    /// a step that fails gets an error entry and does not stop the run.
    pub async fn execute(&self, selected: &[RecoveryOptionId], failure: &FailureReport) -> RecoveryResult {
        let options = plan_options(failure);
        let mut logs = Vec::new();
        let mut recovered = 0usize;

        info!("Starting recovery of {} ({} options)", failure.entity_type, selected.len());

        for id in selected {
            let applicable = options.iter().find(|o| o.id == *id);
            if let Some(RecoveryOption {
                is_applicable: false,
                reason,
                ..
            }) = applicable
            {
                let reason = reason.clone().unwrap_or_default();
                warn!("Recovery option {} skipped: {}", id, reason);
                logs.push(RecoveryLogEntry::warning(*id, format!("Omitido: {}", reason)));
                continue;
            }

            let Some(step) = self.steps.get(id) else {
                warn!("Recovery option {} has no registered step", id);
                logs.push(RecoveryLogEntry::error(*id, "Opción sin implementación registrada"));
                continue;
            };

            logs.push(RecoveryLogEntry::info(*id, format!("Iniciando: {}", id.display_name())));
            match step.run(failure).await {
                Ok(outcome) => {
                    debug!("Recovery option {} recovered {} records", id, outcome.recovered);
                    recovered += outcome.recovered;
                    logs.push(RecoveryLogEntry::success(*id, outcome.message));
                }
                Err(e) => {
                    warn!("Recovery option {} failed: {}", id, e);
                    logs.push(RecoveryLogEntry::error(*id, e.to_string()));
                }
            }
        }

        let recovered_records = recovered.min(failure.failed_records);
        let remaining_errors = failure.failed_records - recovered_records;
        info!(
            "Recovery finished: {} recovered, {} remaining",
            recovered_records, remaining_errors
        );

        RecoveryResult {
            success: true,
            recovered_records,
            remaining_errors,
            logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::default_catalog;
    use crate::services::collaborators::{MemoryExportSink, MockImportBackend};
    use crate::types::{RecoveryLogLevel, ScalarValue};

    struct FailingStep;

    #[async_trait]
    impl RecoveryStep for FailingStep {
        async fn run(&self, _failure: &FailureReport) -> Result<StepOutcome, RecoveryError> {
            Err(RecoveryError::Export("disco lleno".to_string()))
        }
    }

    struct FixedStep(usize);

    #[async_trait]
    impl RecoveryStep for FixedStep {
        async fn run(&self, _failure: &FailureReport) -> Result<StepOutcome, RecoveryError> {
            Ok(StepOutcome {
                recovered: self.0,
                message: "ok".to_string(),
            })
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (1..=n)
            .map(|i| {
                Row::new(i)
                    .with("codigo", format!("C{}", i))
                    .with("nombre", format!("Cliente {}", i))
                    .with("email", format!("c{}@empresa.com", i))
            })
            .collect()
    }

    fn failure(kind: ErrorKind, rows: &[Row], processed: usize) -> FailureReport {
        FailureReport::new("clientes", kind, "fallo")
            .with_counts(rows.len(), processed, rows.len() - processed)
            .with_checkpoint(processed.checked_sub(1).map(|i| rows[i].row_index))
            .with_failed_rows(rows[processed..].to_vec())
    }

    fn context(rows: Vec<Row>, backend: Arc<MockImportBackend>, export: Arc<MemoryExportSink>) -> RecoveryContext {
        let profile = default_catalog().get("clientes").unwrap().clone();
        RecoveryContext {
            entity_type: "clientes".into(),
            rows,
            columns: profile.columns().to_vec(),
            options: ImportOptions::default(),
            validation: profile.validation_engine(),
            correction: profile.correction_engine(),
            backend,
            export,
        }
    }

    #[test]
    fn test_applicability_follows_failure_report() {
        let data = rows(4);
        let options = plan_options(&failure(ErrorKind::Network, &data, 2));
        let applicable: Vec<RecoveryOptionId> = options.iter().filter(|o| o.is_applicable).map(|o| o.id).collect();
        assert_eq!(
            applicable,
            vec![
                RecoveryOptionId::RetryAll,
                RecoveryOptionId::RetryCheckpoint,
                RecoveryOptionId::RetryFailed,
                RecoveryOptionId::ExportFailed,
            ]
        );

        let bare = FailureReport::new("clientes", ErrorKind::Validation, "fallo");
        let options = plan_options(&bare);
        let applicable: Vec<RecoveryOptionId> = options.iter().filter(|o| o.is_applicable).map(|o| o.id).collect();
        assert_eq!(applicable, vec![RecoveryOptionId::RetryAll, RecoveryOptionId::AutoFix]);
        assert!(options[1].reason.is_some());
    }

    #[test]
    fn test_checkpoint_zero_is_not_applicable() {
        let report = FailureReport::new("clientes", ErrorKind::Server, "fallo").with_checkpoint(Some(0));
        let options = plan_options(&report);
        assert!(!options[1].is_applicable);
    }

    #[tokio::test]
    async fn test_failing_option_does_not_abort_the_run() {
        let data = rows(4);
        let report = failure(ErrorKind::Network, &data, 2);
        let planner = RecoveryPlanner::new()
            .with_step(RecoveryOptionId::RetryAll, FailingStep)
            .with_step(RecoveryOptionId::RetryFailed, FixedStep(2));

        let result = planner
            .execute(&[RecoveryOptionId::RetryAll, RecoveryOptionId::RetryFailed], &report)
            .await;

        assert!(result.success);
        let errors: Vec<&RecoveryLogEntry> = result.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].option, RecoveryOptionId::RetryAll);
        assert!(result
            .logs
            .iter()
            .any(|l| l.option == RecoveryOptionId::RetryFailed && l.level == RecoveryLogLevel::Success));
        assert_eq!(result.recovered_records, 2);
        assert_eq!(result.remaining_errors, 0);
    }

    #[tokio::test]
    async fn test_not_applicable_option_is_skipped_with_warning() {
        let report = FailureReport::new("clientes", ErrorKind::Server, "fallo").with_counts(3, 0, 3);
        let planner = RecoveryPlanner::new().with_step(RecoveryOptionId::AutoFix, FixedStep(3));

        let result = planner.execute(&[RecoveryOptionId::AutoFix], &report).await;

        assert!(result.success);
        assert_eq!(result.logs.len(), 1);
        assert_eq!(result.logs[0].level, RecoveryLogLevel::Warning);
        assert_eq!(result.remaining_errors, 3);
    }

    #[tokio::test]
    async fn test_retry_checkpoint_resends_rows_after_checkpoint() {
        let data = rows(5);
        let report = failure(ErrorKind::Server, &data, 3);
        let backend = Arc::new(MockImportBackend::new());
        let planner = RecoveryPlanner::standard(context(data, backend.clone(), Arc::new(MemoryExportSink::new())));

        let result = planner.execute(&[RecoveryOptionId::RetryCheckpoint], &report).await;

        let sent: Vec<usize> = backend.received()[0].iter().map(|r| r.row_index).collect();
        assert_eq!(sent, vec![4, 5]);
        assert_eq!(result.recovered_records, 2);
        assert_eq!(result.remaining_errors, 0);
    }

    #[tokio::test]
    async fn test_retry_failed_that_fails_again_keeps_errors() {
        let data = rows(4);
        let report = failure(ErrorKind::Network, &data, 1);
        let backend = Arc::new(MockImportBackend::new().failing(1, 0, ErrorKind::Network));
        let planner = RecoveryPlanner::standard(context(data, backend.clone(), Arc::new(MemoryExportSink::new())));

        let result = planner
            .execute(&[RecoveryOptionId::RetryFailed, RecoveryOptionId::RetryFailed], &report)
            .await;

        assert!(result.success);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.recovered_records, 3);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_export_failed_writes_csv() {
        let data = rows(3);
        let report = failure(ErrorKind::Server, &data, 1);
        let export = Arc::new(MemoryExportSink::new());
        let planner = RecoveryPlanner::standard(context(data, Arc::new(MockImportBackend::new()), export.clone()));

        let result = planner.execute(&[RecoveryOptionId::ExportFailed], &report).await;

        assert_eq!(result.errors().count(), 0);
        let files = export.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].0.starts_with("fallidos_clientes_"));
        let text = String::from_utf8(files[0].1.clone()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("fila;codigo;email;nombre"));
        assert_eq!(lines.next(), Some("2;C2;c2@empresa.com;Cliente 2"));
        assert_eq!(result.remaining_errors, 2);
    }

    #[tokio::test]
    async fn test_auto_fix_corrects_and_reimports() {
        let mut data = rows(2);
        data[1].set("email", ScalarValue::text("  C2@Empresa.COM "));
        let report = failure(ErrorKind::Validation, &data, 1);
        let backend = Arc::new(MockImportBackend::new());
        let planner = RecoveryPlanner::standard(context(data, backend.clone(), Arc::new(MemoryExportSink::new())));

        let result = planner.execute(&[RecoveryOptionId::AutoFix], &report).await;

        assert_eq!(result.errors().count(), 0, "{:?}", result.logs);
        assert_eq!(backend.received()[0][0].get("email"), &ScalarValue::text("c2@empresa.com"));
        assert_eq!(result.recovered_records, 1);
    }

    #[tokio::test]
    async fn test_auto_fix_without_fixable_issues_is_logged_as_error() {
        let mut data = rows(2);
        data[1].set("email", ScalarValue::text("bad"));
        let report = failure(ErrorKind::Validation, &data, 1);
        let backend = Arc::new(MockImportBackend::new());
        let planner = RecoveryPlanner::standard(context(data, backend.clone(), Arc::new(MemoryExportSink::new())));

        let result = planner.execute(&[RecoveryOptionId::AutoFix], &report).await;

        assert!(result.success);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(backend.calls(), 0);
    }
}
