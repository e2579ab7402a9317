// Sales ETL - Core Library
// Chunked CSV extract, cleaning transform and batched SQLite load.
// Exposes all modules for use by the CLI and by embedding callers.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod transform;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, EtlSettings};
pub use db::{
    ensure_schema, get_run, healthcheck, open_connection, recent_runs,
    verify_count, HealthCheckResult, RunRecord,
};
pub use error::{EtlError, Result};
pub use events::{
    BatchProgress, CollectingEventSink, EventSink, JsonLinesEventSink,
    PipelineEvent, TracingEventSink,
};
pub use loader::{BatchLoader, SqliteLoader};
pub use pipeline::{run_etl, run_pipeline, Pipeline, PipelineState, RunSummary};
pub use reader::{ChunkedReader, RawBatch, RawRecord};
pub use schema::{Field, SalesRecord};
pub use transform::{TransformReport, TransformedBatch, Transformer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
