//! lectern-migrate: validate the migration journal and apply migrations.
//!
//! Validation always happens before a database connection is opened. The
//! connection string comes from `DATABASE_URL` (a `.env` file is honored).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lectern_db::migrations::{
    default_journal_path, Journal, JournalValidator, MigrationConfig, MigrationRunner,
};
use lectern_db::{log_pool_metrics, EnumValueRemoval};

#[derive(Parser)]
#[command(name = "lectern-migrate")]
#[command(author, version, about = "Validate and apply lectern database migrations")]
#[command(propagate_version = true)]
struct Cli {
    /// Migration scripts directory [env: MIGRATIONS_DIR, default: migrations]
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Journal file [env: MIGRATIONS_JOURNAL, default: <migrations-dir>/meta/_journal.json]
    #[arg(long, global = true)]
    journal: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the journal, then apply pending migrations
    Run {
        /// Proceed even if journal validation fails [env: SKIP_MIGRATION_VALIDATION]
        #[arg(long)]
        skip_validation: bool,
    },

    /// Check that scripts and journal agree; never connects to the database
    Validate {
        /// Only compare counts, not tags and numbering
        #[arg(long)]
        count_only: bool,
    },

    /// List applied and pending migrations
    Status,

    /// Journal maintenance
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },

    /// Print SQL that removes a value from an enum type
    EnumDrop(EnumDropArgs),
}

#[derive(Args, Debug)]
struct EnumDropArgs {
    /// Enum type name
    #[arg(long = "type")]
    type_name: String,

    /// Value to remove
    #[arg(long)]
    remove: String,

    /// Value that rows holding the removed value are moved to
    #[arg(long)]
    substitute: String,

    /// Values the reduced type keeps, in order (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    keep: Vec<String>,

    /// Column using the type, as table.column (repeatable)
    #[arg(long = "column", required = true, num_args = 1..)]
    columns: Vec<String>,

    /// Default to restore on every listed column after the swap
    #[arg(long)]
    default: Option<String>,

    /// CHECK constraint to drop for good, as table.constraint (repeatable)
    #[arg(long = "drop-check")]
    drop_checks: Vec<String>,

    /// CHECK constraint to drop and re-add, as table.constraint=EXPRESSION (repeatable)
    #[arg(long = "check")]
    checks: Vec<String>,

    /// Index to drop and rebuild, as name=CREATE INDEX ... (repeatable)
    #[arg(long = "index")]
    indexes: Vec<String>,
}

#[derive(Subcommand)]
enum JournalAction {
    /// Regenerate the journal from the scripts on disk
    Rebuild,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   RUST_LOG    - standard env filter (default: "lectern_migrate=info,lectern_db=info")
///
/// Console logs go to stderr so stdout carries only command output.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lectern_migrate=info,lectern_db=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lectern-migrate.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    }
}

/// Environment config with command-line overrides applied.
fn resolve_config(cli: &Cli) -> MigrationConfig {
    let mut config = MigrationConfig::from_env();
    if let Some(dir) = &cli.migrations_dir {
        config.journal_path = default_journal_path(dir);
        config.migrations_dir = dir.clone();
    }
    if let Some(journal) = &cli.journal {
        config.journal_path = journal.clone();
    }
    config
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli);

    match cli.command {
        Commands::Run { skip_validation } => {
            let bypass = config.skip_validation || skip_validation;
            let config = config.with_skip_validation(bypass);
            runtime()?.block_on(cmd_run(&config))
        }
        Commands::Validate { count_only } => cmd_validate(&config, count_only),
        Commands::Status => runtime()?.block_on(cmd_status(&config)),
        Commands::Journal {
            action: JournalAction::Rebuild,
        } => cmd_journal_rebuild(&config),
        Commands::EnumDrop(args) => cmd_enum_drop(args),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

async fn cmd_run(config: &MigrationConfig) -> Result<()> {
    // Configuration problems surface before any file or network I/O.
    config.database_url()?;

    let (decision, journal) = config.prepare()?;
    println!("{}", decision.summary());

    let pool = config.connect().await?;
    log_pool_metrics(&pool);

    let report = MigrationRunner::new(pool, &config.migrations_dir, journal)
        .run()
        .await?;

    for tag in &report.skipped {
        println!("  skipped  {}", tag);
    }
    for tag in &report.applied {
        println!("  applied  {}", tag);
    }
    println!(
        "Applied {} migration(s); tracking table records {} migration(s)",
        report.applied.len(),
        report.tracked
    );
    info!(
        subsystem = "cli",
        op = "run",
        applied = report.applied.len(),
        tracked = report.tracked,
        "Migrations complete"
    );
    Ok(())
}

fn cmd_validate(config: &MigrationConfig, count_only: bool) -> Result<()> {
    let mut validator = JournalValidator::new(&config.migrations_dir, &config.journal_path);
    if count_only {
        validator = validator.count_only();
    }
    let outcome = validator.validate()?;
    println!("{}", outcome);
    Ok(())
}

async fn cmd_status(config: &MigrationConfig) -> Result<()> {
    config.database_url()?;
    let journal = if config.journal_path.exists() {
        Journal::load(&config.journal_path, 0)?
    } else {
        Journal::empty()
    };
    let pool = config.connect().await?;
    log_pool_metrics(&pool);

    let lines = MigrationRunner::new(pool, &config.migrations_dir, journal)
        .status()
        .await?;
    if lines.is_empty() {
        println!("No migrations registered in the journal");
    }
    for line in lines {
        println!("{:<40} {}", line.tag, line.state);
    }
    Ok(())
}

fn cmd_journal_rebuild(config: &MigrationConfig) -> Result<()> {
    let previous = match Journal::load(&config.journal_path, 0) {
        Ok(journal) => Some(journal),
        Err(e) => {
            warn!(
                subsystem = "cli",
                error = %e,
                "Existing journal not usable; writing a new one"
            );
            None
        }
    };

    let journal = Journal::rebuild_from_dir(&config.migrations_dir, previous.as_ref())?;
    journal.save(&config.journal_path)?;
    println!(
        "Wrote {} with {} entries",
        config.journal_path.display(),
        journal.len()
    );
    Ok(())
}

/// `table.name` as a pair.
fn qualified<'a>(spec: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    spec.split_once('.')
        .with_context(|| format!("{} '{}' must be written as table.{}", what, spec, what))
}

fn build_removal(args: EnumDropArgs) -> Result<EnumValueRemoval> {
    let mut removal = EnumValueRemoval::new(args.type_name, args.remove, args.substitute, args.keep);
    for spec in &args.columns {
        let (table, column) = qualified(spec, "column")?;
        removal = match &args.default {
            Some(value) => removal.column_with_default(table, column, value.as_str()),
            None => removal.column(table, column),
        };
    }
    for spec in &args.drop_checks {
        let (table, name) = qualified(spec, "constraint")?;
        removal = removal.drop_check(table, name);
    }
    for spec in &args.checks {
        let (target, expression) = spec
            .split_once('=')
            .with_context(|| format!("check '{}' must be written as table.constraint=EXPRESSION", spec))?;
        let (table, name) = qualified(target, "constraint")?;
        removal = removal.check(table, name, expression);
    }
    for spec in &args.indexes {
        let (name, definition) = spec
            .split_once('=')
            .with_context(|| format!("index '{}' must be written as name=DEFINITION", spec))?;
        removal = removal.index(name, definition);
    }
    Ok(removal)
}

fn cmd_enum_drop(args: EnumDropArgs) -> Result<()> {
    print!("{}", build_removal(args)?.to_sql()?);
    Ok(())
}
