// Configuration - explicit structs passed into the pipeline
// Precedence: defaults < TOML file < environment < CLI flags (applied by the binary)

use crate::error::{EtlError, Result};
use crate::schema::Field;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CSV_PATH: &str = "data/5m Sales Records.csv";
pub const DEFAULT_CHUNK_SIZE: usize = 200_000;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_DATABASE_PATH: &str = "data/sales.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite caps bound parameters per statement at 32766
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Columns bound per row by the loader's INSERT
pub const INSERT_COLUMNS: usize = Field::ALL.len();

/// Most rows one multi-row INSERT can carry
pub const MAX_INSERT_BATCH_SIZE: usize = SQLITE_MAX_VARIABLES / INSERT_COLUMNS;

// ============================================================================
// DATABASE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; created on first open
    pub path: PathBuf,

    /// How long a write waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// ETL SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    pub csv_path: PathBuf,

    /// Rows per extract/transform batch
    pub chunk_size: usize,

    /// Rows per INSERT statement, independent of chunk_size
    pub insert_batch_size: usize,
}

impl Default for EtlSettings {
    fn default() -> Self {
        EtlSettings {
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            chunk_size: DEFAULT_CHUNK_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

impl EtlSettings {
    pub fn new(csv_path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        EtlSettings {
            csv_path: csv_path.into(),
            chunk_size,
            ..EtlSettings::default()
        }
    }

    pub fn with_insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size;
        self
    }

    /// Insert batch size bounded by SQLite's parameter limit
    pub fn effective_insert_batch_size(&self) -> usize {
        self.insert_batch_size.clamp(1, MAX_INSERT_BATCH_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(EtlError::Config("chunk_size must be positive".to_string()));
        }
        if self.insert_batch_size == 0 {
            return Err(EtlError::Config(
                "insert_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// FULL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub etl: EtlSettings,
}

impl Config {
    /// Read a TOML file; missing keys fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EtlError::Config(format!("invalid TOML: {}", e)))
    }

    /// Overlay process environment (after loading `.env` if present)
    pub fn apply_env(&mut self) -> Result<()> {
        dotenv::dotenv().ok();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CSV_PATH") {
            self.etl.csv_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("CHUNK_SIZE") {
            self.etl.chunk_size = parse_env_number("CHUNK_SIZE", &value)?;
        }
        if let Some(value) = lookup("INSERT_BATCH_SIZE") {
            self.etl.insert_batch_size = parse_env_number("INSERT_BATCH_SIZE", &value)?;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("DATABASE_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_env_number("DATABASE_BUSY_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.etl.validate()
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EtlError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
