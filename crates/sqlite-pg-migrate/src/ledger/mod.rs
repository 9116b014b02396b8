//! Run ledger: the record of one migration run.
//!
//! Tracks the run phase, per-table outcomes and an append-only event log.
//! Every transition is checked (phases and table statuses only move forward,
//! `Failed` is terminal) and, when a ledger file is configured, the whole
//! record is rewritten atomically.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    PreflightChecked,
    BackedUp,
    SchemaApplied,
    DataTransferred,
    Validated,
    Done,
    Failed,
}

impl RunPhase {
    fn rank(self) -> u8 {
        match self {
            RunPhase::NotStarted => 0,
            RunPhase::PreflightChecked => 1,
            RunPhase::BackedUp => 2,
            RunPhase::SchemaApplied => 3,
            RunPhase::DataTransferred => 4,
            RunPhase::Validated => 5,
            RunPhase::Done => 6,
            RunPhase::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    /// Whether `next` may follow `self`. Optional phases may be skipped.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RunPhase::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::NotStarted => "not_started",
            RunPhase::PreflightChecked => "preflight_checked",
            RunPhase::BackedUp => "backed_up",
            RunPhase::SchemaApplied => "schema_applied",
            RunPhase::DataTransferred => "data_transferred",
            RunPhase::Validated => "validated",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pipeline stage being executed, used to name where a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Backup,
    Schema,
    Data,
    Validation,
    Rollback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Preflight => "preflight",
            Stage::Backup => "backup",
            Stage::Schema => "schema",
            Stage::Data => "data",
            Stage::Validation => "validation",
            Stage::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Per-table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Created,
    Populated,
    Validated,
    Failed,
}

impl TableStatus {
    fn rank(self) -> u8 {
        match self {
            TableStatus::Pending => 0,
            TableStatus::Created => 1,
            TableStatus::Populated => 2,
            TableStatus::Validated => 3,
            TableStatus::Failed => 4,
        }
    }

    pub fn can_advance_to(self, next: TableStatus) -> bool {
        if self == TableStatus::Failed {
            return false;
        }
        next == TableStatus::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Pending => "pending",
            TableStatus::Created => "created",
            TableStatus::Populated => "populated",
            TableStatus::Validated => "validated",
            TableStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    pub rows_source: i64,
    pub rows_target: Option<i64>,
    pub status: TableStatus,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub failed_batch_offset: Option<u64>,
    pub failed_row_key: Option<String>,
    /// The table existed in the target before this run and was left alone.
    #[serde(default)]
    pub preexisting: bool,
    /// This run issued the table's `CREATE TABLE`.
    #[serde(default)]
    pub created: bool,
}

impl TableOutcome {
    fn new(table: &str, rows_source: i64) -> Self {
        Self {
            table: table.to_string(),
            rows_source,
            rows_target: None,
            status: TableStatus::Pending,
            error: None,
            error_kind: None,
            failed_batch_offset: None,
            failed_row_key: None,
            preexisting: false,
            created: false,
        }
    }
}

/// Timestamped ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub at: DateTime<Utc>,
    pub phase: RunPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub message: String,
}

/// Record of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    pub run_id: String,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub phase: RunPhase,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    /// Tables in creation order.
    pub tables: Vec<TableOutcome>,
    pub backup_path: Option<PathBuf>,
    pub rollback_script: Option<PathBuf>,
    pub events: Vec<LedgerEvent>,

    #[serde(skip)]
    file: Option<PathBuf>,
}

impl MigrationRun {
    /// Start a fresh run.
    pub fn new(config_hash: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            config_hash: config_hash.into(),
            started_at: Utc::now(),
            ended_at: None,
            phase: RunPhase::NotStarted,
            failed_stage: None,
            error: None,
            tables: Vec::new(),
            backup_path: None,
            rollback_script: None,
            events: Vec::new(),
            file: None,
        }
    }

    /// Persist the ledger to `path` on every transition.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Load a persisted ledger.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the ledger file, if configured (atomic write: temp file, then rename).
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn push_event(&mut self, table: Option<&str>, message: String) {
        debug!(run_id = %self.run_id, "{}", message);
        self.events.push(LedgerEvent {
            at: Utc::now(),
            phase: self.phase,
            table: table.map(str::to_string),
            message,
        });
    }

    /// Record a free-form event.
    pub fn event(&mut self, table: Option<&str>, message: impl Into<String>) -> Result<()> {
        self.push_event(table, message.into());
        self.persist()
    }

    /// Move the run to `next`.
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(MigrateError::Ledger(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        let from = self.phase;
        self.phase = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.push_event(None, format!("phase {} -> {}", from, next));
        self.persist()
    }

    /// End the run as failed during `stage`.
    pub fn fail(&mut self, stage: Stage, error: &MigrateError) -> Result<()> {
        self.failed_stage = Some(stage);
        self.error = Some(error.to_string());
        self.push_event(None, format!("{} failed: {}", stage, error));
        if self.phase.is_terminal() {
            return self.persist();
        }
        self.advance(RunPhase::Failed)
    }

    /// Add a table in `pending` state.
    pub fn register_table(&mut self, table: &str, rows_source: i64) {
        if self.table(table).is_none() {
            self.tables.push(TableOutcome::new(table, rows_source));
        }
    }

    pub fn table(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == table)
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableOutcome> {
        self.tables
            .iter_mut()
            .find(|t| t.table == table)
            .ok_or_else(|| MigrateError::Ledger(format!("unknown table {}", table)))
    }

    /// Move a table to `status`.
    pub fn set_status(&mut self, table: &str, status: TableStatus) -> Result<()> {
        let outcome = self.table_mut(table)?;
        if !outcome.status.can_advance_to(status) {
            return Err(MigrateError::Ledger(format!(
                "illegal status transition for {}: {} -> {}",
                table, outcome.status, status
            )));
        }
        let from = outcome.status;
        outcome.status = status;
        if status == TableStatus::Created && !outcome.preexisting {
            outcome.created = true;
        }
        self.push_event(Some(table), format!("{}: {} -> {}", table, from, status));
        self.persist()
    }

    /// Record the target row count of a table.
    pub fn set_rows_target(&mut self, table: &str, rows: i64) -> Result<()> {
        self.table_mut(table)?.rows_target = Some(rows);
        self.persist()
    }

    /// Flag a table that already existed in the target.
    pub fn mark_preexisting(&mut self, table: &str) -> Result<()> {
        self.table_mut(table)?.preexisting = true;
        self.push_event(Some(table), format!("{}: already present in target, skipped", table));
        self.persist()
    }

    /// Mark a table failed and attach the error.
    pub fn fail_table(&mut self, table: &str, error: &MigrateError) -> Result<()> {
        let outcome = self.table_mut(table)?;
        if outcome.status == TableStatus::Failed {
            return Ok(());
        }
        outcome.error = Some(error.to_string());
        outcome.error_kind = Some(error.kind().to_string());
        if let MigrateError::Data {
            batch_offset,
            row_key,
            ..
        } = error
        {
            outcome.failed_batch_offset = Some(*batch_offset);
            outcome.failed_row_key = row_key.clone();
        }
        self.set_status(table, TableStatus::Failed)
    }

    /// Fail every table still pending or created; `error` builds the
    /// per-table error. Returns how many tables were closed.
    pub fn fail_open_tables(&mut self, error: impl Fn(&str) -> MigrateError) -> Result<usize> {
        let open: Vec<String> = self
            .tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Pending | TableStatus::Created))
            .map(|t| t.table.clone())
            .collect();
        for table in &open {
            self.fail_table(table, &error(table))?;
        }
        Ok(open.len())
    }

    pub fn set_backup(&mut self, path: PathBuf) -> Result<()> {
        self.push_event(None, format!("backup written to {}", path.display()));
        self.backup_path = Some(path);
        self.persist()
    }

    pub fn set_rollback_script(&mut self, path: PathBuf) -> Result<()> {
        self.push_event(None, format!("rollback script written to {}", path.display()));
        self.rollback_script = Some(path);
        self.persist()
    }

    /// Tables this run created in the target, in creation order.
    pub fn created_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.created)
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Done && self.failed_tables().is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let mut run = MigrationRun::new("hash");
        run.advance(RunPhase::PreflightChecked).unwrap();
        // Backup is optional.
        run.advance(RunPhase::SchemaApplied).unwrap();
        assert!(run.advance(RunPhase::PreflightChecked).is_err());
        run.advance(RunPhase::DataTransferred).unwrap();
        run.advance(RunPhase::Done).unwrap();
        assert!(run.ended_at.is_some());
        assert!(run.advance(RunPhase::Failed).is_err());
    }

    #[test]
    fn test_table_status_moves_forward_only() {
        let mut run = MigrationRun::new("hash");
        run.register_table("users", 3);
        run.set_status("users", TableStatus::Created).unwrap();
        run.set_status("users", TableStatus::Populated).unwrap();
        assert!(run.set_status("users", TableStatus::Created).is_err());
        run.set_status("users", TableStatus::Failed).unwrap();
        assert!(run.set_status("users", TableStatus::Validated).is_err());
        assert!(run.set_status("ghost", TableStatus::Created).is_err());
    }

    #[test]
    fn test_fail_table_records_batch_details() {
        let mut run = MigrationRun::new("hash");
        run.register_table("sessions", 5);
        run.set_status("sessions", TableStatus::Created).unwrap();
        let err = MigrateError::Data {
            table: "sessions".into(),
            batch_offset: 4,
            row_key: Some("id=5".into()),
            message: "boom".into(),
        };
        run.fail_table("sessions", &err).unwrap();

        let outcome = run.table("sessions").unwrap();
        assert_eq!(outcome.status, TableStatus::Failed);
        assert_eq!(outcome.failed_batch_offset, Some(4));
        assert_eq!(outcome.failed_row_key.as_deref(), Some("id=5"));
        assert_eq!(outcome.error_kind.as_deref(), Some("data"));
        assert_eq!(run.failed_tables(), vec!["sessions"]);
    }

    #[test]
    fn test_fail_open_tables_leaves_finished_ones() {
        let mut run = MigrationRun::new("hash");
        for t in ["a", "b", "c"] {
            run.register_table(t, 0);
        }
        run.set_status("a", TableStatus::Created).unwrap();
        run.set_status("a", TableStatus::Populated).unwrap();
        run.set_status("b", TableStatus::Created).unwrap();

        let closed = run
            .fail_open_tables(|t| MigrateError::NotAttempted {
                table: t.to_string(),
                reason: "data phase failed".into(),
            })
            .unwrap();
        assert_eq!(closed, 2);
        assert_eq!(run.table("a").unwrap().status, TableStatus::Populated);
        for t in ["b", "c"] {
            let outcome = run.table(t).unwrap();
            assert_eq!(outcome.status, TableStatus::Failed);
            assert_eq!(outcome.error_kind.as_deref(), Some("not_attempted"));
        }
        // The CREATE TABLE issued for b stays on record.
        assert!(run.table("b").unwrap().created);
    }

    #[test]
    fn test_fail_names_stage() {
        let mut run = MigrationRun::new("hash");
        run.advance(RunPhase::PreflightChecked).unwrap();
        run.fail(Stage::Schema, &MigrateError::ddl("CREATE TABLE x ()", "syntax error"))
            .unwrap();
        assert_eq!(run.phase, RunPhase::Failed);
        assert_eq!(run.failed_stage, Some(Stage::Schema));
        assert!(!run.is_success());
    }

    #[test]
    fn test_created_tables_excludes_preexisting_and_pending() {
        let mut run = MigrationRun::new("hash");
        for t in ["a", "b", "c", "d"] {
            run.register_table(t, 0);
        }
        run.set_status("a", TableStatus::Created).unwrap();
        run.mark_preexisting("b").unwrap();
        run.set_status("b", TableStatus::Created).unwrap();
        run.set_status("c", TableStatus::Created).unwrap();
        run.set_status("c", TableStatus::Failed).unwrap();
        run.set_status("d", TableStatus::Failed).unwrap();
        assert_eq!(run.created_tables(), vec!["a", "c"]);
    }

    #[test]
    fn test_persist_is_atomic_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut run = MigrationRun::new("hash").with_file(&path);
        run.register_table("users", 2);
        run.advance(RunPhase::PreflightChecked).unwrap();

        assert!(!path.with_extension("tmp").exists());
        let loaded = MigrationRun::load(&path).unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.phase, RunPhase::PreflightChecked);
        assert_eq!(loaded.tables.len(), 1);
        assert!(!loaded.events.is_empty());
    }
}
