// Store - SQLite connection factory, schema provisioning, health check, run audit
//
// sales_records has no uniqueness constraint on order_id: re-running the same
// source appends the same rows again. Idempotent reruns need a unique index
// plus upsert semantics, which this crate deliberately does not add.
//
// Money columns have NUMERIC affinity, so SQLite stores the bound decimal text
// as REAL. Values round-trip exactly up to 15 significant digits, which covers
// NUMERIC(15, 2); wider values lose precision.

use crate::config::DatabaseConfig;
use crate::error::{EtlError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// CONNECTION
// ============================================================================

/// Open (creating if needed) the SQLite database described by `config`
pub fn open_connection(config: &DatabaseConfig) -> Result<Connection> {
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            EtlError::Config(format!(
                "cannot create database directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let conn = Connection::open(&config.path)?;
    configure(&conn, config.busy_timeout_ms)?;
    debug!(path = %config.path.display(), "opened store");
    Ok(conn)
}

fn configure(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Create the target table, indexes and run audit table if missing.
/// Safe to call on every run.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sales_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            country TEXT NOT NULL,
            item_type TEXT NOT NULL,
            sales_channel TEXT NOT NULL,
            order_priority TEXT NOT NULL,
            order_date DATE NOT NULL,
            order_id INTEGER NOT NULL,
            ship_date DATE NOT NULL,
            units_sold INTEGER NOT NULL,
            unit_price NUMERIC(12, 2) NOT NULL,
            unit_cost NUMERIC(12, 2) NOT NULL,
            total_revenue NUMERIC(15, 2) NOT NULL,
            total_cost NUMERIC(15, 2) NOT NULL,
            total_profit NUMERIC(15, 2) NOT NULL,
            inserted_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_sales_order_id ON sales_records(order_id);
        CREATE INDEX IF NOT EXISTS idx_sales_order_date ON sales_records(order_date);

        CREATE TABLE IF NOT EXISTS etl_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            source_path TEXT NOT NULL,
            chunk_size INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            rows_loaded INTEGER NOT NULL DEFAULT 0,
            batches INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_etl_runs_started ON etl_runs(started_at);",
    )
    .map_err(EtlError::SchemaProvision)?;

    info!("schema ensured");
    Ok(())
}

// ============================================================================
// HEALTH CHECK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub ok: bool,
    pub error: Option<String>,
}

/// Read the schema page; failures are reported, not swallowed
pub fn healthcheck(conn: &Connection) -> HealthCheckResult {
    match conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0)) {
        Ok(_) => HealthCheckResult {
            ok: true,
            error: None,
        },
        Err(e) => HealthCheckResult {
            ok: false,
            error: Some(e.to_string()),
        },
    }
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sales_records", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// RUN AUDIT
// ============================================================================

/// One row of etl_runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub source_path: String,
    pub chunk_size: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub rows_loaded: i64,
    pub batches: i64,
    pub error: Option<String>,
}

pub fn record_run_started(
    conn: &Connection,
    run_id: &str,
    source_path: &str,
    chunk_size: usize,
) -> Result<()> {
    conn.execute(
        "INSERT INTO etl_runs (run_id, source_path, chunk_size, started_at, status)
         VALUES (?1, ?2, ?3, ?4, 'running')",
        params![run_id, source_path, chunk_size as i64, Utc::now().to_rfc3339()],
    )?;

    Ok(())
}

pub fn record_run_finished(
    conn: &Connection,
    run_id: &str,
    status: &str,
    rows_loaded: u64,
    batches: usize,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE etl_runs
         SET finished_at = ?2, status = ?3, rows_loaded = ?4, batches = ?5, error = ?6
         WHERE run_id = ?1",
        params![
            run_id,
            Utc::now().to_rfc3339(),
            status,
            rows_loaded as i64,
            batches as i64,
            error,
        ],
    )?;

    Ok(())
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
    let run = conn
        .query_row(
            "SELECT run_id, source_path, chunk_size, started_at, finished_at,
                    status, rows_loaded, batches, error
             FROM etl_runs
             WHERE run_id = ?1",
            [run_id],
            run_from_row,
        )
        .optional()?;

    Ok(run)
}

/// Most recent runs first
pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, source_path, chunk_size, started_at, finished_at,
                status, rows_loaded, batches, error
         FROM etl_runs
         ORDER BY started_at DESC, id DESC
         LIMIT ?1",
    )?;

    let runs = stmt
        .query_map([limit as i64], run_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(runs)
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let started_at: String = row.get(3)?;
    let finished_at: Option<String> = row.get(4)?;

    Ok(RunRecord {
        run_id: row.get(0)?,
        source_path: row.get(1)?,
        chunk_size: row.get(2)?,
        started_at: parse_timestamp(3, &started_at)?,
        finished_at: finished_at
            .map(|s| parse_timestamp(4, &s))
            .transpose()?,
        status: row.get(5)?,
        rows_loaded: row.get(6)?,
        batches: row.get(7)?,
        error: row.get(8)?,
    })
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_order_id_is_not_unique() {
        let conn = memory_store();
        let insert = "INSERT INTO sales_records (region, country, item_type, sales_channel,
            order_priority, order_date, order_id, ship_date, units_sold, unit_price, unit_cost,
            total_revenue, total_cost, total_profit)
            VALUES ('A', 'B', 'C', 'D', 'E', '2020-01-01', 1, '2020-01-02', 1, 1, 1, 1, 1, 0)";

        conn.execute(insert, []).unwrap();
        conn.execute(insert, []).unwrap();

        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_open_connection_creates_file_and_directories() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested/deeper/sales.db"),
            ..DatabaseConfig::default()
        };

        let conn = open_connection(&config).unwrap();
        ensure_schema(&conn).unwrap();

        assert!(config.path.exists());
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_healthcheck_reports_ok() {
        let conn = Connection::open_in_memory().unwrap();
        let result = healthcheck(&conn);

        assert!(result.ok);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_healthcheck_reports_failure_instead_of_swallowing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        fs::write(&path, "this is a plain text file and not a sqlite database at all ".repeat(20))
            .unwrap();
        let conn = Connection::open(&path).unwrap();

        let result = healthcheck(&conn);

        assert!(!result.ok);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_schema_failure_maps_to_schema_provision() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE seed (x INTEGER)")
            .unwrap();
        let conn = Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
            .unwrap();

        let result = ensure_schema(&conn);

        assert!(matches!(result, Err(EtlError::SchemaProvision(_))));
    }

    #[test]
    fn test_run_audit_lifecycle() {
        let conn = memory_store();

        record_run_started(&conn, "run-1", "sales.csv", 100).unwrap();
        let started = get_run(&conn, "run-1").unwrap().unwrap();
        assert_eq!(started.status, "running");
        assert_eq!(started.finished_at, None);

        record_run_finished(&conn, "run-1", "failed", 100, 1, Some("boom")).unwrap();
        let finished = get_run(&conn, "run-1").unwrap().unwrap();
        assert_eq!(finished.status, "failed");
        assert_eq!(finished.rows_loaded, 100);
        assert_eq!(finished.batches, 1);
        assert_eq!(finished.error.as_deref(), Some("boom"));
        assert!(finished.finished_at.is_some());

        record_run_started(&conn, "run-2", "sales.csv", 100).unwrap();
        let runs = recent_runs(&conn, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(get_run(&conn, "missing").unwrap().is_none());
    }
}
