//! CLI argument parsing and commands for the tarifa-import binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::WizardError;
use crate::services::catalog::EntityCatalog;
use crate::services::collaborators::{CatalogTemplateProvider, DirectoryExportSink, MockImportBackend, TemplateProvider};
use crate::services::formula::{validate_formula, Formula, TARIFF_VARIABLES};
use crate::services::history::ImportHistory;
use crate::services::tariff::TariffRuleEvaluator;
use crate::services::wizard::ImportWizard;
use crate::types::{BaseValues, ErrorKind, RecoveryOptionId, ScalarValue, SourceFile, TariffRule};

#[derive(Parser)]
#[command(name = "tarifa-import", about = "Spreadsheet import wizard and tariff rule tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a CSV file against an entity's columns
    Validate {
        #[arg(long)]
        entity: String,
        file: PathBuf,
    },
    /// Run the whole import wizard against the mock backend
    Import {
        #[arg(long)]
        entity: String,
        file: PathBuf,
        /// Leave rows with errors out of the import
        #[arg(long)]
        skip_invalid: bool,
        /// Apply auto-fixes before importing
        #[arg(long)]
        auto_correct: bool,
        /// Make the mock backend fail this many times
        #[arg(long, default_value_t = 0)]
        fail_times: usize,
        /// Rows the mock backend accepts before failing
        #[arg(long, default_value_t = 0)]
        fail_after: usize,
        /// Recovery options to run after a failure (e.g. retry-failed,export-failed)
        #[arg(long, value_delimiter = ',')]
        recover: Vec<RecoveryOptionId>,
        /// Directory for exported failed rows
        #[arg(long, default_value = "./exports")]
        export_dir: PathBuf,
    },
    /// Write the CSV template of an entity
    Template {
        #[arg(long)]
        entity: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a tariff formula and optionally evaluate it
    Formula {
        expression: String,
        /// Variable values as name=value
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
    },
    /// Evaluate tariff rules from a JSON file
    Tariff {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        tarifa: f64,
        #[arg(long, default_value_t = 0.0)]
        peaje: f64,
        #[arg(long, default_value_t = 0.0)]
        extras: f64,
        /// Context values as field=value
        #[arg(long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,
        /// Evaluation date (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show recent imports
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        entity: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn history_for(config: &Config) -> ImportHistory {
    match &config.history_file {
        Some(path) => ImportHistory::with_file(path),
        None => ImportHistory::new(),
    }
}

async fn read_source(path: &Path) -> Result<SourceFile> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceFile::new(name, content))
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let catalog = Arc::new(EntityCatalog::builtin(config.phone_min_digits));

    match cli.command {
        Command::Validate { entity, file } => {
            let mut wizard = ImportWizard::new(catalog, Arc::new(MockImportBackend::new()))
                .with_config(config.wizard_config());
            wizard.select_entity(&entity)?;
            wizard.upload_file(read_source(&file).await?).await?;
            wizard.validate().await?;
            let state = wizard.state();
            print_json(&serde_json::json!({
                "summary": state.validation_summary,
                "issues": state.validation_issues,
            }))
        }
        Command::Import {
            entity,
            file,
            skip_invalid,
            auto_correct,
            fail_times,
            fail_after,
            recover,
            export_dir,
        } => {
            let backend = MockImportBackend::new().failing(fail_times, fail_after, ErrorKind::Server);
            let mut wizard = ImportWizard::new(catalog, Arc::new(backend))
                .with_config(config.wizard_config())
                .with_history(history_for(&config))
                .with_export_sink(Arc::new(DirectoryExportSink::new(export_dir)));
            wizard.set_skip_invalid_rows(skip_invalid);
            wizard.set_auto_correct(auto_correct);

            wizard.select_entity(&entity)?;
            wizard.upload_file(read_source(&file).await?).await?;
            wizard.validate().await?;

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, cancelling import");
                    ctrl_c.cancel();
                }
            });

            match wizard.start_import(&cancel).await {
                Ok(_) => {}
                Err(WizardError::Transport(report)) if !recover.is_empty() => {
                    info!("Import failed ({}), running recovery", report);
                    let outcome = wizard.recover(&recover).await?;
                    print_json(&outcome)?;
                }
                Err(e) => return Err(e.into()),
            }

            let state = wizard.state();
            info!("Wizard finished at step {} ({})", state.step.index(), state.step.label());
            print_json(&serde_json::json!({
                "result": state.result,
                "statistics": wizard.statistics(),
                "failure": state.failure,
            }))
        }
        Command::Template { entity, output } => {
            let file = CatalogTemplateProvider::new(catalog).get_template(&entity).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &file.content)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Template written to {}", path.display());
                }
                None => print!("{}", String::from_utf8_lossy(&file.content)),
            }
            Ok(())
        }
        Command::Formula { expression, vars } => {
            let mut known: Vec<&str> = TARIFF_VARIABLES.to_vec();
            known.extend(vars.iter().map(|(k, _)| k.as_str()));
            let report = validate_formula(&expression, known);
            print_json(&report)?;
            if !report.valida {
                bail!("Invalid formula");
            }
            if !vars.is_empty() {
                let values: HashMap<String, f64> = vars
                    .iter()
                    .map(|(k, v)| {
                        ScalarValue::text(v.as_str())
                            .to_number()
                            .map(|n| (k.clone(), n))
                            .with_context(|| format!("Variable {} is not a number", k))
                    })
                    .collect::<Result<_>>()?;
                let result = Formula::parse(&expression)?.evaluate(&values)?;
                println!("{}", result);
            }
            Ok(())
        }
        Command::Tariff {
            rules,
            tarifa,
            peaje,
            extras,
            context,
            date,
        } => {
            let raw = tokio::fs::read_to_string(&rules)
                .await
                .with_context(|| format!("Failed to read {}", rules.display()))?;
            let rules: Vec<TariffRule> = serde_json::from_str(&raw).context("Invalid tariff rules JSON")?;
            let context: HashMap<String, ScalarValue> = context
                .into_iter()
                .map(|(k, v)| {
                    let value = ScalarValue::text(v.as_str());
                    let value = value.to_number().map(ScalarValue::Number).unwrap_or(value);
                    (k, value)
                })
                .collect();
            let base = BaseValues { tarifa, peaje, extras };
            let evaluator = TariffRuleEvaluator::new(config.tariff_config());
            let evaluation = match date {
                Some(date) => evaluator.evaluate_on(date, base, &context, &rules)?,
                None => evaluator.evaluate(base, &context, &rules)?,
            };
            print_json(&evaluation)
        }
        Command::History { limit, entity } => {
            let history = history_for(&config);
            let response = match entity {
                Some(entity) => history.get_by_entity(&entity, limit),
                None => history.get_recent(limit),
            };
            print_json(&response)
        }
    }
}
