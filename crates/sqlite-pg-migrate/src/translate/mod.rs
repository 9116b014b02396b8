//! Schema translation: source catalog in, ordered PostgreSQL DDL plan out.
//!
//! - [`check`]: CHECK constraint extraction and enum recognition
//! - [`graph`]: foreign-key creation order
//! - [`ddl`]: statement rendering
//!
//! [`build_plan`] is the entry point used by the orchestrator. It introspects
//! the source, orders the tables, profiles the stored values of every column
//! and hands everything to [`plan_schema`], which is pure.

pub mod check;
pub mod ddl;
pub mod graph;

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, EnumStrategy};
use crate::core::identifier::{quote_ident, validate_check_constraint, validate_identifier};
use crate::core::schema::{ColumnProfile, Table, TargetType};
use crate::core::traits::DatabaseAdapter;
use crate::error::Result;
use crate::typemap::{map_column, needs_profile, ColumnFacts};

use self::check::{parse_enum, referenced_names, EnumCheck};

/// SQLite functions with no PostgreSQL counterpart of the same name.
const SQLITE_ONLY_FUNCTIONS: &[&str] = &[
    "typeof", "glob", "julianday", "strftime", "datetime", "unixepoch", "ifnull", "instr",
    "printf", "zeroblob", "randomblob", "likelihood", "iif",
];

/// Knobs that shape the generated DDL.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub schema: String,
    pub enum_strategy: EnumStrategy,
    pub create_indexes: bool,
    pub create_check_constraints: bool,
    pub index_after_load_threshold: i64,
}

impl TranslateOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let m = &config.migration;
        Ok(Self {
            schema: config.target_spec()?.schema.clone(),
            enum_strategy: m.enum_strategy,
            create_indexes: m.create_indexes,
            create_check_constraints: m.create_check_constraints,
            index_after_load_threshold: m.index_after_load_threshold,
        })
    }
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            enum_strategy: EnumStrategy::default(),
            create_indexes: true,
            create_check_constraints: true,
            index_after_load_threshold: 10_000,
        }
    }
}

/// Mapping chosen for one column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnPlan {
    pub name: String,
    pub source_type: String,
    pub target_type: String,
    pub reason: &'static str,
}

/// A native enum type created for one column.
#[derive(Debug, Clone, Serialize)]
pub struct EnumTypePlan {
    pub name: String,
    pub column: String,
    pub labels: Vec<String>,
    pub create_sql: String,
}

/// Everything needed to create and finish one target table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    /// Source descriptor with `target_type` filled in on every column.
    pub table: Table,
    pub columns: Vec<ColumnPlan>,
    pub enum_types: Vec<EnumTypePlan>,
    /// Enumerated domains carried to the target, audited after transfer.
    pub domains: Vec<EnumCheck>,
    pub create_table: String,
    /// Indexes created together with the table.
    pub inline_indexes: Vec<String>,
    /// Indexes created after the table is loaded.
    pub deferred_indexes: Vec<String>,
    /// Statements moving identity sequences past the loaded keys.
    pub identity_resets: Vec<String>,
    /// Source CHECK bodies not carried over.
    pub skipped_checks: Vec<String>,
}

impl TablePlan {
    pub fn name(&self) -> &str {
        &self.table.name
    }

    /// Statements run in the schema phase for this table, in order.
    pub fn schema_statements(&self) -> Vec<String> {
        let mut out: Vec<String> = self.enum_types.iter().map(|e| e.create_sql.clone()).collect();
        out.push(self.create_table.clone());
        out.extend(self.inline_indexes.iter().cloned());
        out
    }
}

/// Ordered plan for the whole database.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaPlan {
    pub schema: String,
    /// Tables in creation order.
    pub tables: Vec<TablePlan>,
}

impl SchemaPlan {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TablePlan> {
        self.tables
            .iter()
            .find(|t| t.table.name.eq_ignore_ascii_case(name))
    }

    /// Every statement the plan would run, in execution order.
    pub fn statements(&self) -> Vec<String> {
        let mut out = Vec::new();
        for table in &self.tables {
            out.extend(table.schema_statements());
        }
        for table in &self.tables {
            out.extend(table.deferred_indexes.iter().cloned());
            out.extend(table.identity_resets.iter().cloned());
        }
        out
    }
}

/// Column profiles keyed by lower-cased `(table, column)`.
pub type Profiles = HashMap<(String, String), ColumnProfile>;

fn profile_key(table: &str, column: &str) -> (String, String) {
    (table.to_lowercase(), column.to_lowercase())
}

/// Introspect every user table of the source.
pub async fn introspect(source: &dyn DatabaseAdapter) -> Result<Vec<Table>> {
    let names = source.list_tables().await?;
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        validate_identifier(&name)?;
        let table = source.introspect_table(&name).await?;
        debug!(
            "{}: {} columns, {} foreign keys, {} rows",
            table.name,
            table.columns.len(),
            table.foreign_keys.len(),
            table.row_count
        );
        tables.push(table);
    }
    Ok(tables)
}

/// Introspect, order, profile and translate the source schema.
pub async fn build_plan(source: &dyn DatabaseAdapter, options: &TranslateOptions) -> Result<SchemaPlan> {
    let tables = introspect(source).await?;
    info!("Found {} tables", tables.len());

    // Ordering fails fast on cycles before any profiling scans.
    graph::creation_order(&tables)?;

    let mut profiles = Profiles::new();
    for table in &tables {
        for column in &table.columns {
            if needs_profile(table, column) {
                let profile = source.profile_column(&table.name, &column.name).await?;
                profiles.insert(profile_key(&table.name, &column.name), profile);
            }
        }
    }
    debug!("Profiled {} columns", profiles.len());

    plan_schema(tables, &profiles, options)
}

/// Enum-shaped checks of a table keyed by lower-cased column name.
fn enum_checks(table: &Table) -> HashMap<String, EnumCheck> {
    let mut out = HashMap::new();
    for check in &table.check_constraints {
        if let Some(e) = parse_enum(&check.definition) {
            if table.column(&e.column).is_some() {
                out.entry(e.column.to_lowercase()).or_insert(e);
            }
        }
    }
    out
}

/// Translate introspected tables into an ordered DDL plan.
pub fn plan_schema(tables: Vec<Table>, profiles: &Profiles, options: &TranslateOptions) -> Result<SchemaPlan> {
    validate_identifier(&options.schema)?;
    let order = graph::creation_order(&tables)?;

    let primary_keys: HashMap<String, Vec<String>> = tables
        .iter()
        .map(|t| (t.name.to_lowercase(), t.primary_key.clone()))
        .collect();
    let referenced = referenced_keys(&tables);

    let mut slots: Vec<Option<Table>> = tables.into_iter().map(Some).collect();
    let mut plans = Vec::with_capacity(slots.len());
    for i in order {
        let Some(table) = slots[i].take() else { continue };
        plans.push(plan_table(table, profiles, options, &primary_keys, &referenced)?);
    }

    Ok(SchemaPlan {
        schema: options.schema.clone(),
        tables: plans,
    })
}

/// Lower-cased, sorted column set.
fn column_set(columns: &[String]) -> Vec<String> {
    let mut set: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    set.sort();
    set
}

/// Column sets named by foreign keys, keyed by lower-cased referenced table.
///
/// A reference without explicit columns targets the primary key, which is
/// always created with the table.
fn referenced_keys(tables: &[Table]) -> HashMap<String, Vec<Vec<String>>> {
    let mut out: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    for fk in tables.iter().flat_map(|t| &t.foreign_keys) {
        if fk.ref_columns.is_empty() {
            continue;
        }
        out.entry(fk.ref_table.to_lowercase())
            .or_default()
            .push(column_set(&fk.ref_columns));
    }
    out
}

fn plan_table(
    mut table: Table,
    profiles: &Profiles,
    options: &TranslateOptions,
    primary_keys: &HashMap<String, Vec<String>>,
    referenced: &HashMap<String, Vec<Vec<String>>>,
) -> Result<TablePlan> {
    let schema = options.schema.as_str();
    let enums = enum_checks(&table);

    let mut columns = Vec::with_capacity(table.columns.len());
    let mut decided = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        validate_identifier(&column.name)?;
        let decision = map_column(ColumnFacts {
            table: &table,
            column,
            enum_check: enums.get(&column.name.to_lowercase()),
            profile: profiles.get(&profile_key(&table.name, &column.name)),
        });
        columns.push(ColumnPlan {
            name: column.name.clone(),
            source_type: column.source_type.clone(),
            target_type: decision.target.label(),
            reason: decision.reason,
        });
        decided.push(decision.target);
    }
    for (column, target) in table.columns.iter_mut().zip(decided) {
        column.target_type = Some(target);
    }

    let mut enum_types = Vec::new();
    let mut domains = Vec::new();
    let mut clauses = Vec::new();
    let mut skipped_checks = Vec::new();

    // Columns whose values change representation; source expressions over
    // them would not type-check on the target.
    let retyped: Vec<String> = table
        .columns
        .iter()
        .filter(|c| matches!(c.target(), TargetType::Boolean) || c.target().is_temporal())
        .map(|c| c.name.to_lowercase())
        .collect();

    for check in table.check_constraints.clone() {
        if let Some(e) = parse_enum(&check.definition).filter(|e| table.column(&e.column).is_some()) {
            let Some(idx) = table.column_index(&e.column) else { continue };
            let column_name = table.columns[idx].name.clone();
            let target = table.columns[idx].target().clone();

            if target == TargetType::Boolean {
                if !e.is_boolean() {
                    warn!(
                        "{}.{}: CHECK ({}) dropped, column is boolean",
                        table.name, column_name, check.definition
                    );
                    skipped_checks.push(check.definition.clone());
                    domains.push(e);
                }
                continue;
            }

            if options.enum_strategy == EnumStrategy::NativeEnum
                && e.is_textual()
                && target == TargetType::Text
                && !enum_types.iter().any(|t: &EnumTypePlan| t.column.eq_ignore_ascii_case(&column_name))
            {
                let name = ddl::enum_type_name(&table.name, &column_name);
                let labels = e.labels();
                enum_types.push(EnumTypePlan {
                    create_sql: ddl::create_enum_type_sql(schema, &name, &labels)?,
                    name: name.clone(),
                    column: column_name.clone(),
                    labels,
                });
                table.columns[idx].target_type = Some(TargetType::Enum { type_name: name.clone() });
                columns[idx].target_type = TargetType::Enum { type_name: name }.label();
                columns[idx].reason = "enumerated CHECK";
            } else {
                let clause = ddl::enum_check_clause(&column_name, &e.values)?;
                clauses.push(match &check.name {
                    Some(n) => format!("CONSTRAINT {} {}", quote_ident(n)?, clause),
                    None => clause,
                });
            }
            domains.push(e);
            continue;
        }

        if !options.create_check_constraints {
            skipped_checks.push(check.definition.clone());
            continue;
        }
        if let Err(e) = validate_check_constraint(&check.definition) {
            warn!("{}: CHECK skipped: {}", table.name, e);
            skipped_checks.push(check.definition.clone());
            continue;
        }
        let names = referenced_names(&check.definition);
        if let Some(f) = names.iter().find(|n| SQLITE_ONLY_FUNCTIONS.contains(&n.as_str())) {
            warn!("{}: CHECK ({}) uses {}(), skipped", table.name, check.definition, f);
            skipped_checks.push(check.definition.clone());
            continue;
        }
        if let Some(c) = names.iter().find(|n| retyped.contains(n)) {
            warn!(
                "{}: CHECK ({}) references retyped column {}, skipped",
                table.name, check.definition, c
            );
            skipped_checks.push(check.definition.clone());
            continue;
        }
        clauses.push(ddl::check_clause(check.name.as_deref(), &check.definition)?);
    }

    let create_table = ddl::create_table_sql(schema, &table, &clauses, primary_keys)?;

    let mut inline_indexes = Vec::new();
    let mut deferred_indexes = Vec::new();
    let defer = table.row_count >= options.index_after_load_threshold;
    let referenced_sets = referenced.get(&table.name.to_lowercase());
    for index in &table.indexes {
        if !index.is_unique && !options.create_indexes {
            continue;
        }
        let sql = ddl::create_index_sql(schema, &table.name, index)?;
        // Foreign keys of later tables need this unique key at CREATE time.
        let backs_reference = index.is_unique
            && referenced_sets.is_some_and(|sets| sets.contains(&column_set(&index.columns)));
        if defer && !backs_reference {
            deferred_indexes.push(sql);
        } else {
            inline_indexes.push(sql);
        }
    }

    let identity_resets = table
        .columns
        .iter()
        .filter(|c| *c.target() == TargetType::Identity)
        .map(|c| ddl::reset_identity_sql(schema, &table.name, &c.name))
        .collect::<Result<Vec<_>>>()?;

    Ok(TablePlan {
        table,
        columns,
        enum_types,
        domains,
        create_table,
        inline_indexes,
        deferred_indexes,
        identity_resets,
        skipped_checks,
    })
}
