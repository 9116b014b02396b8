//! Configuration validation.

use super::{Config, ConnectionSpec};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    let source = match &config.source {
        ConnectionSpec::Sqlite(spec) => spec,
        other => {
            return Err(MigrateError::Config(format!(
                "source.type must be 'sqlite', got '{}'",
                other.kind()
            )))
        }
    };
    if source.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }

    // Target validation
    let target = match &config.target {
        ConnectionSpec::Postgres(spec) => spec,
        other => {
            return Err(MigrateError::Config(format!(
                "target.type must be 'postgres', got '{}'",
                other.kind()
            )))
        }
    };
    if target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if target.port == 0 {
        return Err(MigrateError::Config("target.port must be non-zero".into()));
    }
    if target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema is required".into()));
    }
    SslMode::parse(&target.ssl_mode)?;

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.index_after_load_threshold < 0 {
        return Err(MigrateError::Config(
            "migration.index_after_load_threshold must not be negative".into(),
        ));
    }
    if migration.statement_timeout_secs == 0 || migration.connect_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration timeouts must be at least 1 second".into(),
        ));
    }

    Ok(())
}
