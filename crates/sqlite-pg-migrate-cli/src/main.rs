//! sqlite-pg-migrate CLI - one-shot SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::config::CONFIG_TEMPLATE;
use sqlite_pg_migrate::error::EXIT_VALIDATION_ERROR;
use sqlite_pg_migrate::{Config, ExistingTables, MigrateError, Orchestrator, SchemaError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "Migrate a SQLite database into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Write the run ledger to this JSON file (overrides migration.ledger_file)
    #[arg(long)]
    ledger_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check both connections, print the planned DDL and dry-run it in a rolled-back transaction
    Test,

    /// Run the full migration
    Migrate,

    /// Write a configuration template
    CreateConfig {
        /// Output path for configuration file [default: config.yaml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Validate row counts and samples between source and an existing target
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    // Handle create-config separately (doesn't need existing config)
    if let Commands::CreateConfig { output, force } = &cli.command {
        let output_path = output.clone().unwrap_or_else(|| PathBuf::from("config.yaml"));
        write_template(&output_path, *force)?;
        println!("Wrote configuration template to {}", output_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::CreateConfig { .. } => unreachable!(), // Handled above

        Commands::Test => {
            let existing_mode = config.migration.existing_tables;
            let orchestrator = Orchestrator::new(config).await?;
            let preflight = match orchestrator.preflight().await {
                Ok(preflight) => preflight,
                Err(e) => {
                    orchestrator.close().await;
                    return Err(e);
                }
            };
            let dry_run = orchestrator.dry_run(&preflight).await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&preflight.plan)?);
            } else {
                println!("-- Planned DDL ({} tables)", preflight.plan.tables.len());
                for statement in preflight.plan.statements() {
                    println!("{};\n", statement);
                }
            }

            if !preflight.existing.is_empty() {
                match existing_mode {
                    ExistingTables::Fail => {
                        return Err(SchemaError::ExistingTables(preflight.existing).into());
                    }
                    ExistingTables::Skip => {
                        warn!(
                            "Target already contains {}; these would be skipped",
                            preflight.existing.join(", ")
                        );
                    }
                }
            }
            let checked = dry_run?;
            info!("Test completed, {} statements checked, nothing was written", checked);
        }

        Commands::Migrate => {
            let cancel_token = setup_signal_handler()?;

            let mut orchestrator = Orchestrator::new(config).await?;
            if let Some(ref path) = cli.ledger_file {
                orchestrator = orchestrator.with_ledger_file(path.clone());
            }

            let result = orchestrator.run(cancel_token).await;
            orchestrator.close().await;
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = if report.is_success() {
                    "Migration completed!"
                } else {
                    "Migration failed!"
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Tables: {}/{}", report.tables_success, report.tables_total);
                println!("  Rows: {}", report.rows_transferred);
                println!("  Throughput: {} rows/sec", report.rows_per_second);
                if let Some(ref path) = report.backup_path {
                    println!("  Backup: {}", path.display());
                }
                if let Some(ref path) = report.rollback_script {
                    println!("  Rollback script: {}", path.display());
                }
                if let (Some(stage), Some(error)) = (report.failed_stage, &report.error) {
                    println!("  Failed during {}: {}", stage, error);
                }
                if !report.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", report.failed_tables);
                }
            }

            if !report.is_success() {
                return Ok(ExitCode::from(report.exit_code));
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let results = orchestrator.validate().await;
            orchestrator.close().await;
            let results = results?;

            let failed = results.iter().filter(|r| !r.passed()).count();
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for r in &results {
                    if r.passed() {
                        println!("  OK   {} ({} rows, {} sampled)", r.table, r.rows_target, r.sampled);
                    } else {
                        println!("  FAIL {}: {}", r.table, r.detail());
                    }
                }
                println!("\n{}/{} tables valid", results.len() - failed, results.len());
            }

            if failed > 0 {
                warn!("Validation failed for {} tables", failed);
                return Ok(ExitCode::from(EXIT_VALIDATION_ERROR));
            }
            info!("Validation completed successfully");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn write_template(path: &Path, force: bool) -> Result<(), MigrateError> {
    if path.exists() && !force {
        return Err(MigrateError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// The run stops at the next table boundary once the token is cancelled.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current table...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current table...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
