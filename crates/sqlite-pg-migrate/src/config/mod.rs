//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Environment variables that override target connection fields.
pub const ENV_TARGET_HOST: &str = "TARGET_DB_HOST";
pub const ENV_TARGET_PORT: &str = "TARGET_DB_PORT";
pub const ENV_TARGET_NAME: &str = "TARGET_DB_NAME";
pub const ENV_TARGET_USER: &str = "TARGET_DB_USER";
pub const ENV_TARGET_PASSWORD: &str = "TARGET_DB_PASSWORD";

/// Template written by `create-config`.
pub const CONFIG_TEMPLATE: &str = r#"# sqlite-pg-migrate configuration
source:
  type: sqlite
  path: ./app.db

target:
  type: postgres
  host: localhost
  port: 5432
  database: app
  user: postgres
  password: ""          # or TARGET_DB_PASSWORD
  schema: public
  ssl_mode: disable     # disable | require | verify-ca | verify-full

migration:
  batch_size: 1000
  backup_before_migration: true
  validate_after_migration: true
  create_rollback_script: true
  sample_rows: 0        # rows per table compared field by field, 0 = off
  enum_strategy: check  # check | native_enum
  existing_tables: fail # fail | skip
  index_after_load_threshold: 10000
  statement_timeout_secs: 300
  connect_retries: 3
  # ledger_file: ./migration-ledger.json
  # lock_file: ./app.db.migrate.lock
  # output_dir: ./
"#;

impl Config {
    /// Load configuration from a YAML file, applying environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Override target credentials from a variable lookup.
    ///
    /// Only applies when the target is a networked engine.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ConnectionSpec::Postgres(target) = &mut self.target else {
            return Ok(());
        };

        if let Some(host) = lookup(ENV_TARGET_HOST) {
            target.host = host;
        }
        if let Some(port) = lookup(ENV_TARGET_PORT) {
            target.port = port.trim().parse().map_err(|_| {
                MigrateError::Config(format!("{} must be a port number, got '{}'", ENV_TARGET_PORT, port))
            })?;
        }
        if let Some(name) = lookup(ENV_TARGET_NAME) {
            target.database = name;
        }
        if let Some(user) = lookup(ENV_TARGET_USER) {
            target.user = user;
        }
        if let Some(password) = lookup(ENV_TARGET_PASSWORD) {
            target.password = password;
        }
        Ok(())
    }

    /// Compute a SHA256 hash of the configuration, recorded in the ledger.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The source file spec. Validation guarantees the source is SQLite.
    pub fn source_spec(&self) -> Result<&SqliteSpec> {
        self.source.as_sqlite().ok_or_else(|| {
            MigrateError::Config(format!(
                "source.type must be 'sqlite', got '{}'",
                self.source.kind()
            ))
        })
    }

    /// The target connection spec. Validation guarantees the target is PostgreSQL.
    pub fn target_spec(&self) -> Result<&PostgresSpec> {
        self.target.as_postgres().ok_or_else(|| {
            MigrateError::Config(format!(
                "target.type must be 'postgres', got '{}'",
                self.target.kind()
            ))
        })
    }

    /// Lock marker location: configured path, or beside the source file.
    pub fn lock_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.migration.lock_file {
            return Ok(path.clone());
        }
        let source = &self.source_spec()?.path;
        let mut name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".migrate.lock");
        Ok(source.with_file_name(name))
    }

    /// Directory that receives rollback scripts.
    pub fn output_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.migration.output_dir {
            return Ok(dir.clone());
        }
        let source = &self.source_spec()?.path;
        Ok(match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        })
    }
}

impl PostgresSpec {
    /// Human-readable endpoint without credentials.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
source:
  type: sqlite
  path: /data/app.db
target:
  type: postgres
  host: db.internal
  database: app
  user: migrator
  password: secret
"#;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let target = config.target_spec().unwrap();
        assert_eq!(target.port, 5432);
        assert_eq!(target.schema, "public");
        assert_eq!(target.ssl_mode, "disable");
        assert_eq!(config.migration.batch_size, 1000);
        assert_eq!(config.migration.enum_strategy, EnumStrategy::Check);
        assert_eq!(config.migration.existing_tables, ExistingTables::Fail);
        assert!(config.migration.validate_after_migration);
        assert_eq!(config.source_spec().unwrap().busy_timeout_secs, 5);
    }

    #[test]
    fn test_engine_aliases_accepted() {
        let yaml = r#"
source:
  type: embedded_file
  path: app.db
target:
  type: networked_relational
  host: localhost
  database: app
  user: u
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.kind(), "sqlite");
        assert_eq!(config.target.kind(), "postgres");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = MINIMAL.replace("password: secret", "password: secret\n  pasword: typo");
        assert!(Config::from_yaml(&yaml).is_err());

        let yaml = format!("{}\nmigration:\n  batchsize: 5\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_sqlite_fields_rejected_on_postgres_spec() {
        let yaml = MINIMAL.replace("host: db.internal", "host: db.internal\n  path: x.db");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_env_overrides_replace_target_fields() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_TARGET_HOST, "override.host"),
            (ENV_TARGET_PORT, "6543"),
            (ENV_TARGET_NAME, "other"),
            (ENV_TARGET_USER, "admin"),
            (ENV_TARGET_PASSWORD, "from-env"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        let target = config.target_spec().unwrap();
        assert_eq!(target.host, "override.host");
        assert_eq!(target.port, 6543);
        assert_eq!(target.database, "other");
        assert_eq!(target.user, "admin");
        assert_eq!(target.password, "from-env");
    }

    #[test]
    fn test_env_override_bad_port_is_config_error() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        let err = config
            .apply_env_overrides_from(|k| (k == ENV_TARGET_PORT).then(|| "abc".to_string()))
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let b = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        let c = Config::from_yaml(&MINIMAL.replace("database: app", "database: app2")).unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_lock_path_defaults_beside_source() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(
            config.lock_path().unwrap(),
            PathBuf::from("/data/app.db.migrate.lock")
        );
        assert_eq!(config.output_dir().unwrap(), PathBuf::from("/data"));
    }

    #[test]
    fn test_template_parses() {
        let config = Config::from_yaml(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.source.kind(), "sqlite");
    }
}
