// Error taxonomy for the sales ETL pipeline
// Row-level repairs are never errors; they surface as counts in TransformReport.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Source file could not be opened; fatal before any batch is processed
    #[error("source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source opened but reading failed mid-stream
    #[error("failed to read source: {0}")]
    SourceRead(#[from] csv::Error),

    /// Row shape differs from the header; coerced, logged, never fatal
    #[error("malformed row at line {line}: expected {expected} fields, found {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    /// None of the canonical columns were found in the header
    #[error("no recognised sales columns in header: [{}]", headers.join(", "))]
    MissingColumns { headers: Vec<String> },

    /// A batch failed to persist; earlier batches stay committed
    #[error("store write failed for batch {batch_index}: {source}")]
    StoreWrite {
        batch_index: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// Target table could not be ensured
    #[error("schema provisioning failed: {0}")]
    SchemaProvision(#[source] rusqlite::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Store failed the pre-run health check
    #[error("store health check failed: {0}")]
    Unhealthy(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;

impl EtlError {
    /// Short machine-readable kind, used in structured events
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::SourceUnavailable { .. } => "source_unavailable",
            EtlError::SourceRead(_) => "source_read",
            EtlError::MalformedRow { .. } => "malformed_row",
            EtlError::MissingColumns { .. } => "missing_columns",
            EtlError::StoreWrite { .. } => "store_write",
            EtlError::SchemaProvision(_) => "schema_provision",
            EtlError::Store(_) => "store",
            EtlError::Unhealthy(_) => "unhealthy",
            EtlError::Config(_) => "config",
        }
    }
}
