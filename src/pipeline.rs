// Pipeline Driver - Reader -> Transformer -> Loader, one batch at a time
//
// State machine: Idle -> Running -> Completed | Failed.
// Fail-fast: the first unrecoverable error ends the run. Batches loaded before
// the failure stay persisted; nothing is retried or rolled back across batches.
// Load order always equals source order.

use crate::config::{Config, EtlSettings};
use crate::db::{
    ensure_schema, healthcheck, open_connection, record_run_finished, record_run_started,
};
use crate::error::{EtlError, Result};
use crate::events::{BatchProgress, EventSink, PipelineEvent};
use crate::loader::{BatchLoader, SqliteLoader};
use crate::reader::{estimate_total_rows, ChunkedReader};
use crate::transform::Transformer;
use std::path::Path;
use tracing::{debug, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

/// Outcome of one run. On failure `total_rows_loaded` counts only rows
/// committed before the failing batch.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub total_rows_loaded: u64,
    pub batches_processed: usize,
    pub failed: bool,
    pub error: Option<EtlError>,
}

impl RunSummary {
    pub fn status(&self) -> PipelineState {
        if self.failed {
            PipelineState::Failed
        } else {
            PipelineState::Completed
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    total_rows: Option<u64>,
    rows_extracted: u64,
    rows_loaded: u64,
    batches: usize,
}

impl Progress {
    fn percentage(&self) -> Option<f64> {
        let total = self.total_rows.filter(|&t| t > 0)?;
        let pct = (self.rows_extracted as f64 / total as f64 * 100.0).min(100.0);
        Some((pct * 100.0).round() / 100.0)
    }
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct Pipeline<'a> {
    settings: EtlSettings,
    transformer: Transformer,
    loader: &'a mut dyn BatchLoader,
    events: &'a mut dyn EventSink,
    state: PipelineState,
    run_id: Uuid,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: EtlSettings,
        loader: &'a mut dyn BatchLoader,
        events: &'a mut dyn EventSink,
    ) -> Self {
        Pipeline {
            settings,
            transformer: Transformer::new(),
            loader,
            events,
            state: PipelineState::Idle,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Drive the whole source. Never panics on pipeline errors; they are
    /// returned in the summary with `failed = true`.
    pub fn run(&mut self) -> RunSummary {
        let span = info_span!("etl_run", run_id = %self.run_id);
        let _enter = span.enter();

        self.state = PipelineState::Running;
        let mut progress = Progress::default();
        let outcome = self.drive(&mut progress);
        let run_id = self.run_id.to_string();

        match outcome {
            Ok(()) => {
                self.state = PipelineState::Completed;
                self.events.emit(&PipelineEvent::RunCompleted {
                    run_id,
                    total_rows_loaded: progress.rows_loaded,
                    batches: progress.batches,
                });
                RunSummary {
                    run_id: self.run_id,
                    total_rows_loaded: progress.rows_loaded,
                    batches_processed: progress.batches,
                    failed: false,
                    error: None,
                }
            }
            Err(error) => {
                self.state = PipelineState::Failed;
                self.events.emit(&PipelineEvent::RunFailed {
                    run_id,
                    total_rows_loaded: progress.rows_loaded,
                    batches: progress.batches,
                    error_kind: error.kind().to_string(),
                    error: error.to_string(),
                });
                RunSummary {
                    run_id: self.run_id,
                    total_rows_loaded: progress.rows_loaded,
                    batches_processed: progress.batches,
                    failed: true,
                    error: Some(error),
                }
            }
        }
    }

    fn drive(&mut self, progress: &mut Progress) -> Result<()> {
        self.settings.validate()?;

        let path = self.settings.csv_path.clone();
        let reader = ChunkedReader::open(&path, self.settings.chunk_size)?;
        debug!(headers = ?reader.headers(), "source columns");
        progress.total_rows = estimate_total_rows(&path);

        self.events.emit(&PipelineEvent::RunStarted {
            run_id: self.run_id.to_string(),
            source_path: path.display().to_string(),
            chunk_size: self.settings.chunk_size,
            total_rows: progress.total_rows,
        });

        for batch in reader {
            let batch = batch?;
            let batch_index = batch.index;
            let rows_extracted = batch.len();

            let transformed = self.transformer.transform(batch)?;
            self.events.emit(&PipelineEvent::BatchDiagnostics {
                batch_index,
                report: transformed.report.clone(),
            });

            let rows_loaded = self.loader.load(batch_index, &transformed.records)?;

            progress.rows_extracted += rows_extracted as u64;
            progress.rows_loaded += rows_loaded as u64;
            progress.batches += 1;

            self.events.emit(&PipelineEvent::BatchProgress(BatchProgress {
                batch_index,
                rows_extracted,
                rows_transformed: transformed.records.len(),
                rows_loaded,
                cumulative_rows_loaded: progress.rows_loaded,
                progress_pct: progress.percentage(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Run one source through the given loader and event sink
pub fn run_pipeline(
    source_path: &Path,
    batch_size: usize,
    loader: &mut dyn BatchLoader,
    events: &mut dyn EventSink,
) -> RunSummary {
    Pipeline::new(EtlSettings::new(source_path, batch_size), loader, events).run()
}

/// Full run against the configured SQLite store: health check, schema,
/// run audit row, pipeline. Errors before the pipeline starts are returned
/// as `Err`; pipeline failures are reported in the summary.
pub fn run_etl(config: &Config, events: &mut dyn EventSink) -> Result<RunSummary> {
    config.validate()?;

    let conn = open_connection(&config.database)?;
    let health = healthcheck(&conn);
    if !health.ok {
        return Err(EtlError::Unhealthy(
            health.error.unwrap_or_else(|| "unknown".to_string()),
        ));
    }
    ensure_schema(&conn)?;

    let run_id = Uuid::new_v4();
    let settings = config.etl.clone();
    record_run_started(
        &conn,
        &run_id.to_string(),
        &settings.csv_path.display().to_string(),
        settings.chunk_size,
    )?;

    let mut loader = SqliteLoader::new(&conn, settings.effective_insert_batch_size());
    let summary = Pipeline::new(settings, &mut loader, events)
        .with_run_id(run_id)
        .run();

    let error = summary.error.as_ref().map(|e| e.to_string());
    if let Err(e) = record_run_finished(
        &conn,
        &run_id.to_string(),
        summary.status().as_str(),
        summary.total_rows_loaded,
        summary.batches_processed,
        error.as_deref(),
    ) {
        warn!(run_id = %run_id, error = %e, "failed to record run outcome");
    }

    Ok(summary)
}
