//! Migration orchestrator - main workflow coordinator.
//!
//! Drives one run through preflight, backup, schema, data, validation and
//! rollback-script generation, recording every transition in the ledger.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, ExistingTables as ExistingTablesMode};
use crate::core::traits::DatabaseAdapter;
use crate::drivers::{PostgresAdapter, SqliteAdapter};
use crate::error::{MigrateError, Result, SchemaError};
use crate::ledger::{MigrationRun, RunPhase, Stage, TableOutcome, TableStatus};
use crate::lock::LockGuard;
use crate::rollback::write_rollback_script;
use crate::transfer::TransferEngine;
use crate::translate::{build_plan, SchemaPlan, TablePlan, TranslateOptions};
use crate::verify::{TableValidation, Validator};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn DatabaseAdapter>,
    target: Arc<dyn DatabaseAdapter>,
    ledger_file: Option<PathBuf>,
}

/// Outcome of the preflight step.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub plan: SchemaPlan,
    /// Planned tables already present in the target.
    pub existing: Vec<String>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// "completed" or "failed".
    pub status: String,

    /// Final ledger phase.
    pub phase: RunPhase,

    /// Stage that failed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Process exit code for this outcome.
    pub exit_code: u8,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_success: usize,
    pub tables_failed: usize,
    pub rows_transferred: i64,
    pub rows_per_second: i64,
    pub failed_tables: Vec<String>,

    /// Per-table breakdown.
    pub tables: Vec<TableOutcome>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<TableValidation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_script: Option<PathBuf>,
}

impl MigrationReport {
    fn from_run(run: &MigrationRun, failure: Option<&MigrateError>, validation: Vec<TableValidation>) -> Self {
        let completed_at = run.ended_at.unwrap_or_else(Utc::now);
        let duration = (completed_at - run.started_at).num_milliseconds() as f64 / 1000.0;

        let tables_success = run
            .tables
            .iter()
            .filter(|t| t.status != TableStatus::Failed && t.status != TableStatus::Pending)
            .count();
        let failed_tables: Vec<String> = run.failed_tables().into_iter().map(str::to_string).collect();
        let rows_transferred: i64 = run
            .tables
            .iter()
            .filter(|t| !t.preexisting && t.status != TableStatus::Failed)
            .filter_map(|t| t.rows_target)
            .sum();
        let rows_per_second = if duration > 0.0 {
            (rows_transferred as f64 / duration) as i64
        } else {
            0
        };

        let success = run.is_success();
        Self {
            run_id: run.run_id.clone(),
            status: if success { "completed" } else { "failed" }.to_string(),
            phase: run.phase,
            failed_stage: run.failed_stage,
            error: run.error.clone(),
            error_kind: failure.map(|e| e.kind().to_string()),
            exit_code: if success { 0 } else { failure.map_or(crate::error::EXIT_INTERNAL_ERROR, |e| e.exit_code()) },
            started_at: run.started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: run.tables.len(),
            tables_success,
            tables_failed: failed_tables.len(),
            rows_transferred,
            rows_per_second,
            failed_tables,
            tables: run.tables.clone(),
            validation,
            backup_path: run.backup_path.clone(),
            rollback_script: run.rollback_script.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Orchestrator {
    /// Open both engines described by `config`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = SqliteAdapter::connect(config.source_spec()?).await?;
        let target = PostgresAdapter::connect(config.target_spec()?, &config.migration).await?;
        Ok(Self::with_adapters(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over already-connected adapters.
    pub fn with_adapters(config: Config, source: Arc<dyn DatabaseAdapter>, target: Arc<dyn DatabaseAdapter>) -> Self {
        let ledger_file = config.migration.ledger_file.clone();
        Self {
            config,
            source,
            target,
            ledger_file,
        }
    }

    /// Persist the run ledger to `path` on every transition.
    pub fn with_ledger_file(mut self, path: PathBuf) -> Self {
        self.ledger_file = Some(path);
        self
    }

    fn options(&self) -> Result<TranslateOptions> {
        TranslateOptions::from_config(&self.config)
    }

    /// Introspect and plan the source schema, then look for conflicts in
    /// the target. Nothing is written.
    pub async fn preflight(&self) -> Result<Preflight> {
        let plan = build_plan(self.source.as_ref(), &self.options()?).await?;
        if plan.tables.is_empty() {
            return Err(SchemaError::Introspection(format!(
                "source {} contains no tables",
                self.source.describe()
            ))
            .into());
        }

        let mut existing = Vec::new();
        for table in &plan.tables {
            if self.target.table_exists(table.name()).await? {
                existing.push(table.name().to_string());
            }
        }
        Ok(Preflight { plan, existing })
    }

    /// Run the full pipeline.
    ///
    /// Returns `Err` only when the run could not start (lock held, ledger
    /// unwritable). Every later failure is recorded in the returned report,
    /// whose `exit_code` is non-zero.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let mut run = MigrationRun::new(self.config.hash());
        if let Some(path) = &self.ledger_file {
            run = run.with_file(path.clone());
        }
        let _lock = LockGuard::acquire(&self.config.lock_path()?, &run.run_id)?;

        info!("Starting migration run: {}", run.run_id);
        run.persist()?;

        let mut stage = Stage::Preflight;
        let mut validation = Vec::new();
        let outcome = self
            .execute(&mut run, &mut stage, &mut validation, &cancel)
            .await;

        let failure = match outcome {
            Ok(()) => None,
            Err(e) => {
                let reason = format!("run stopped during {} phase", stage);
                run.fail_open_tables(|table| MigrateError::NotAttempted {
                    table: table.to_string(),
                    reason: reason.clone(),
                })?;
                run.fail(stage, &e)?;
                Some(e)
            }
        };

        let report = MigrationReport::from_run(&run, failure.as_ref(), validation);
        for table in &report.tables {
            match &table.error {
                Some(e) => warn!("{}: {} ({})", table.table, table.status, e),
                None => info!("{}: {}", table.table, table.status),
            }
        }
        match &failure {
            None => info!(
                "Migration {}: {} tables, {} rows in {:.1}s ({} rows/s)",
                report.status,
                report.tables_total,
                report.rows_transferred,
                report.duration_seconds,
                report.rows_per_second
            ),
            Some(e) => error!(
                "Migration failed during {} phase: {} ({} of {} tables failed)",
                stage, e, report.tables_failed, report.tables_total
            ),
        }
        Ok(report)
    }

    async fn execute(
        &self,
        run: &mut MigrationRun,
        stage: &mut Stage,
        validation: &mut Vec<TableValidation>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let migration = &self.config.migration;

        // Phase 1: Preflight
        *stage = Stage::Preflight;
        info!(
            "Phase 1: Preflight ({} -> {})",
            self.source.describe(),
            self.target.describe()
        );
        let Preflight { plan, existing } = self.preflight().await?;
        for table in &plan.tables {
            run.register_table(table.name(), table.table.row_count);
        }
        if !existing.is_empty() {
            match migration.existing_tables {
                ExistingTablesMode::Fail => {
                    return Err(SchemaError::ExistingTables(existing).into());
                }
                ExistingTablesMode::Skip => {
                    for name in &existing {
                        warn!("{}: already present in target, skipping", name);
                        run.mark_preexisting(name)?;
                    }
                }
            }
        }
        info!("Creation order: {}", plan.table_names().join(", "));
        run.advance(RunPhase::PreflightChecked)?;

        // Phase 2: Backup
        if migration.backup_before_migration {
            *stage = Stage::Backup;
            info!("Phase 2: Backing up source");
            let path = self.source.snapshot(&self.config.output_dir()?).await?;
            run.set_backup(path)?;
            run.advance(RunPhase::BackedUp)?;
        }

        if cancel.is_cancelled() {
            return cancel_remaining(run);
        }

        // Phase 3: Schema
        *stage = Stage::Schema;
        info!("Phase 3: Applying schema to {}", plan.schema);
        for table in &plan.tables {
            let name = table.name();
            if !is_preexisting(run, name) {
                if let Err(e) = self.target.execute_ddl_batch(&table.schema_statements()).await {
                    run.fail_table(name, &e)?;
                    return Err(e);
                }
                info!("{}: created", name);
            }
            run.set_status(name, TableStatus::Created)?;
        }
        run.advance(RunPhase::SchemaApplied)?;

        // Phase 4: Data
        *stage = Stage::Data;
        info!("Phase 4: Transferring data (batch size {})", migration.batch_size);
        let engine = TransferEngine::new(self.source.clone(), self.target.clone(), migration.batch_size);
        let mut first_error: Option<MigrateError> = None;
        let mut failed: Vec<String> = Vec::new();

        for table in &plan.tables {
            let name = table.name();
            if cancel.is_cancelled() {
                return cancel_remaining(run);
            }

            if is_preexisting(run, name) {
                let rows = self.target.row_count(name).await?;
                run.set_rows_target(name, rows)?;
                run.set_status(name, TableStatus::Populated)?;
                continue;
            }

            if let Some(dep) = table
                .table
                .referenced_tables()
                .into_iter()
                .find(|dep| failed.iter().any(|f| f.eq_ignore_ascii_case(dep)))
            {
                let e = MigrateError::data(name, format!("not attempted, depends on failed table {}", dep));
                warn!("{}", e);
                run.fail_table(name, &e)?;
                failed.push(name.to_string());
                first_error.get_or_insert(e);
                continue;
            }

            let result = match engine.transfer_table(&table.table).await {
                Ok(_) => self.finish_table(table).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(rows) => {
                    run.set_rows_target(name, rows)?;
                    run.set_status(name, TableStatus::Populated)?;
                    info!("{}: populated ({} rows)", name, rows);
                }
                Err(e @ (MigrateError::Data { .. } | MigrateError::Schema(_))) => {
                    error!("{}: {}", name, e);
                    run.fail_table(name, &e)?;
                    // Rows from batches before the failure stay committed.
                    if let Ok(rows) = self.target.row_count(name).await {
                        run.set_rows_target(name, rows)?;
                    }
                    failed.push(name.to_string());
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    run.fail_table(name, &e)?;
                    return Err(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        run.advance(RunPhase::DataTransferred)?;

        // Phase 5: Validation
        if migration.validate_after_migration {
            *stage = Stage::Validation;
            info!("Phase 5: Validating");
            let validator = Validator::new(self.source.clone(), self.target.clone(), migration.sample_rows);
            let mut first_error: Option<MigrateError> = None;
            for table in &plan.tables {
                let name = table.name();
                let result = validator.validate_table(table, is_preexisting(run, name)).await?;
                run.set_rows_target(name, result.rows_target)?;
                match result.to_error() {
                    None => run.set_status(name, TableStatus::Validated)?,
                    Some(e) => {
                        run.fail_table(name, &e)?;
                        first_error.get_or_insert(e);
                    }
                }
                validation.push(result);
            }
            if let Some(e) = first_error {
                return Err(e);
            }
            run.advance(RunPhase::Validated)?;
        }

        // Phase 6: Rollback script
        if migration.create_rollback_script {
            *stage = Stage::Rollback;
            let created: Vec<String> = run.created_tables().into_iter().map(str::to_string).collect();
            let enum_types: Vec<String> = plan
                .tables
                .iter()
                .filter(|t| created.iter().any(|c| c == t.name()))
                .flat_map(|t| t.enum_types.iter().map(|e| e.name.clone()))
                .collect();
            let created_refs: Vec<&str> = created.iter().map(String::as_str).collect();
            let path = write_rollback_script(
                &self.config.output_dir()?,
                &run.run_id,
                &plan.schema,
                &created_refs,
                &enum_types,
            )?;
            run.set_rollback_script(path)?;
        }

        run.advance(RunPhase::Done)?;
        Ok(())
    }

    /// Deferred indexes and identity resets; returns the loaded row count.
    async fn finish_table(&self, table: &TablePlan) -> Result<i64> {
        for statement in table.deferred_indexes.iter().chain(&table.identity_resets) {
            self.target.execute_ddl(statement).await?;
        }
        self.target.row_count(table.name()).await
    }

    /// Run the schema statements of every table the run would create inside
    /// a transaction that is always rolled back. Returns the statement count.
    pub async fn dry_run(&self, preflight: &Preflight) -> Result<usize> {
        let to_create: Vec<&TablePlan> = preflight
            .plan
            .tables
            .iter()
            .filter(|t| !preflight.existing.iter().any(|e| e.eq_ignore_ascii_case(t.name())))
            .collect();
        let mut statements: Vec<String> = to_create.iter().flat_map(|t| t.schema_statements()).collect();
        for table in &to_create {
            statements.extend(table.deferred_indexes.iter().cloned());
            statements.extend(table.identity_resets.iter().cloned());
        }

        info!("Dry-running {} statements against {}", statements.len(), self.target.describe());
        self.target.dry_run_ddl(&statements).await?;
        info!("Schema dry-check passed, nothing was kept");
        Ok(statements.len())
    }

    /// Check an existing target against the source without writing.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let plan = build_plan(self.source.as_ref(), &self.options()?).await?;
        let validator = Validator::new(self.source.clone(), self.target.clone(), self.config.migration.sample_rows);

        let mut results = Vec::with_capacity(plan.tables.len());
        for table in &plan.tables {
            let name = table.name();
            if !self.target.table_exists(name).await? {
                warn!("{}: missing in target", name);
                results.push(TableValidation::missing(name, self.source.row_count(name).await?));
                continue;
            }
            results.push(validator.validate_table(table, false).await?);
        }
        Ok(results)
    }

    /// Release both connections.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

fn cancel_remaining(run: &mut MigrationRun) -> Result<()> {
    warn!("Cancellation requested, stopping at table boundary");
    run.fail_open_tables(|_| MigrateError::Cancelled)?;
    Err(MigrateError::Cancelled)
}

fn is_preexisting(run: &MigrationRun, table: &str) -> bool {
    run.table(table).is_some_and(|t| t.preexisting)
}
