// Structured events - progress and diagnostics emitted by the pipeline driver
//
// The driver only produces facts; sinks decide where they go (tracing,
// JSON lines, memory).

use crate::transform::TransformReport;
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub rows_extracted: usize,
    pub rows_transformed: usize,
    pub rows_loaded: usize,
    pub cumulative_rows_loaded: u64,
    /// None when the total row count is unknown
    pub progress_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        source_path: String,
        chunk_size: usize,
        total_rows: Option<u64>,
    },
    BatchDiagnostics {
        batch_index: usize,
        report: TransformReport,
    },
    BatchProgress(BatchProgress),
    RunCompleted {
        run_id: String,
        total_rows_loaded: u64,
        batches: usize,
    },
    RunFailed {
        run_id: String,
        total_rows_loaded: u64,
        batches: usize,
        error_kind: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::BatchDiagnostics { .. } => "batch_diagnostics",
            PipelineEvent::BatchProgress(_) => "batch_progress",
            PipelineEvent::RunCompleted { .. } => "run_completed",
            PipelineEvent::RunFailed { .. } => "run_failed",
        }
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Receives every event the driver emits. Sinks must not fail the run.
pub trait EventSink {
    fn emit(&mut self, event: &PipelineEvent);
}

/// Emits each event as one tracing record with key-value fields
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted {
                run_id,
                source_path,
                chunk_size,
                total_rows,
            } => info!(
                event = event.name(),
                run_id = %run_id,
                source_path = %source_path,
                chunk_size,
                total_rows = ?total_rows,
                "extract started"
            ),
            PipelineEvent::BatchDiagnostics {
                batch_index,
                report,
            } => info!(
                event = event.name(),
                batch_index,
                rows_in = report.rows_in,
                malformed_rows = report.malformed_rows,
                invalid_dates = report.invalid_dates,
                invalid_numbers = report.invalid_numbers,
                categorical_filled = report.categorical_filled,
                numeric_filled = report.numeric_filled,
                dates_filled = report.dates_filled,
                ids_synthesized = report.ids_synthesized,
                duplicates_removed = report.duplicates_removed,
                missing_id_dropped = report.missing_id_dropped,
                negative_units_dropped = report.negative_units_dropped,
                ship_dates_repaired = report.ship_dates_repaired,
                rows_out = report.rows_out,
                "transform diagnostics"
            ),
            PipelineEvent::BatchProgress(progress) => info!(
                event = event.name(),
                batch_index = progress.batch_index,
                rows_extracted = progress.rows_extracted,
                rows_transformed = progress.rows_transformed,
                rows_loaded = progress.rows_loaded,
                cumulative_rows_loaded = progress.cumulative_rows_loaded,
                progress_pct = ?progress.progress_pct,
                "batch loaded"
            ),
            PipelineEvent::RunCompleted {
                run_id,
                total_rows_loaded,
                batches,
            } => info!(
                event = event.name(),
                run_id = %run_id,
                total_rows_loaded,
                batches,
                "etl completed"
            ),
            PipelineEvent::RunFailed {
                run_id,
                total_rows_loaded,
                batches,
                error_kind,
                error,
            } => tracing::error!(
                event = event.name(),
                run_id = %run_id,
                total_rows_loaded,
                batches,
                error_kind = %error_kind,
                error = %error,
                "etl failed"
            ),
        }
    }
}

/// Writes one JSON object per event per line
pub struct JsonLinesEventSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesEventSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesEventSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesEventSink<W> {
    fn emit(&mut self, event: &PipelineEvent) {
        let written = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());

        if let Err(e) = written {
            warn!(event = event.name(), error = %e, "failed to write event");
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    pub events: Vec<PipelineEvent>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> Vec<&BatchProgress> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::BatchProgress(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&mut self, event: &PipelineEvent) {
        self.events.push(event.clone());
    }
}

/// Fan out to two sinks
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &PipelineEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}
