use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sales_etl::logging::init_logging;
use sales_etl::{
    ensure_schema, healthcheck, open_connection, recent_runs, run_etl, verify_count, Config,
    JsonLinesEventSink, TracingEventSink,
};

// ============================================================================
// CLI DEFINITION
// ============================================================================

/// Load large sales CSV exports into a relational store
#[derive(Parser, Debug)]
#[command(name = "sales-etl")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (values are overridden by environment and flags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Also write daily-rolling JSON logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the target table and indexes if missing
    Initdb,

    /// Run the ETL over a CSV export
    Run {
        /// Source CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Rows per extract/transform batch
        #[arg(long)]
        chunk: Option<usize>,

        /// Rows per INSERT statement
        #[arg(long)]
        insert_batch: Option<usize>,

        /// Also write structured events as JSON lines to this file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Check that the store answers a trivial query
    Health,

    /// Show recent runs from the audit table
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_json, cli.log_dir.as_deref());

    // Return instead of exiting so the log guard flushes on the way out
    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Ok(false) when the command ran but reports failure
fn execute(cli: Cli) -> Result<bool> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    match cli.command {
        Commands::Initdb => initdb(&config).map(|_| true),
        Commands::Run {
            csv,
            chunk,
            insert_batch,
            events,
        } => {
            if let Some(csv) = csv {
                config.etl.csv_path = csv;
            }
            if let Some(chunk) = chunk {
                config.etl.chunk_size = chunk;
            }
            if let Some(size) = insert_batch {
                config.etl.insert_batch_size = size;
            }
            run(&config, events.as_deref())
        }
        Commands::Health => health(&config),
        Commands::History { limit } => history(&config, limit).map(|_| true),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn initdb(config: &Config) -> Result<()> {
    let conn = open_connection(&config.database)
        .with_context(|| format!("opening {}", config.database.path.display()))?;
    ensure_schema(&conn)?;

    println!("✓ Schema ready in {}", config.database.path.display());
    Ok(())
}

fn run(config: &Config, events_path: Option<&Path>) -> Result<bool> {
    let summary = match events_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating events file {}", path.display()))?;
            let mut sink = (TracingEventSink, JsonLinesEventSink::new(BufWriter::new(file)));
            run_etl(config, &mut sink)?
        }
        None => run_etl(config, &mut TracingEventSink)?,
    };

    match &summary.error {
        None => {
            println!(
                "✅ Loaded {} rows in {} batches (run {})",
                summary.total_rows_loaded, summary.batches_processed, summary.run_id
            );
            Ok(true)
        }
        Some(error) => {
            eprintln!("❌ Run {} failed: {}", summary.run_id, error);
            eprintln!(
                "   {} rows in {} batches were committed before the failure",
                summary.total_rows_loaded, summary.batches_processed
            );
            Ok(false)
        }
    }
}

fn health(config: &Config) -> Result<bool> {
    let conn = open_connection(&config.database)?;
    let result = healthcheck(&conn);

    println!("{}", serde_json::to_string(&result)?);
    Ok(result.ok)
}

fn history(config: &Config, limit: usize) -> Result<()> {
    let conn = open_connection(&config.database)?;
    ensure_schema(&conn)?;

    let runs = recent_runs(&conn, limit)?;
    if runs.is_empty() {
        println!("No runs recorded yet");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {:<9}  rows={:<10} batches={:<5} {}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status,
            run.rows_loaded,
            run.batches,
            run.run_id,
            run.source_path
        );
        if let Some(error) = &run.error {
            println!("    error: {}", error);
        }
    }
    println!("Total rows in sales_records: {}", verify_count(&conn)?);
    Ok(())
}
