// Chunked Reader - lazy, finite sequence of raw record batches from a CSV export
//
// Headers are read once and shared by every batch. Rows whose field count
// differs from the header are coerced (padded / truncated), counted and logged.

use crate::error::{EtlError, Result};
use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on up-front allocation per batch
const PREALLOC_ROWS: usize = 8_192;

// ============================================================================
// RAW RECORDS
// ============================================================================

/// One input row, values positionally aligned with the batch headers.
/// Empty strings stand for missing values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line in the source file (header is line 1)
    pub line: u64,
    values: Vec<String>,
}

impl RawRecord {
    pub fn new(line: u64, values: Vec<String>) -> Self {
        RawRecord { line, values }
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    #[cfg(test)]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

#[derive(Debug, Clone)]
pub struct RawBatch {
    /// 0-based position of this batch in the run
    pub index: usize,
    pub headers: Arc<Vec<String>>,
    pub records: Vec<RawRecord>,
    /// Rows coerced to the header width while reading
    pub malformed_rows: usize,
}

impl RawBatch {
    /// Build a batch from in-memory rows (embedding and tests)
    pub fn from_rows(index: usize, headers: &[&str], rows: &[&[&str]]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let width = headers.len();
        let mut malformed_rows = 0;

        let records = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != width {
                    malformed_rows += 1;
                }
                RawRecord::new(i as u64 + 2, coerce_width(row.iter().map(|v| v.to_string()), width))
            })
            .collect();

        RawBatch {
            index,
            headers: Arc::new(headers),
            records,
            malformed_rows,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn coerce_width<I: Iterator<Item = String>>(values: I, width: usize) -> Vec<String> {
    let mut values: Vec<String> = values.take(width).map(|v| v.trim().to_string()).collect();
    values.resize(width, String::new());
    values
}

// ============================================================================
// CHUNKED READER
// ============================================================================

pub struct ChunkedReader<R: Read = File> {
    reader: csv::Reader<R>,
    headers: Arc<Vec<String>>,
    batch_size: usize,
    next_index: usize,
    record: ByteRecord,
    exhausted: bool,
}

impl ChunkedReader<File> {
    /// Open a CSV export. Fails with `SourceUnavailable` if it cannot be opened.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(|source| EtlError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), batch_size, "opened source");
        Self::from_reader(file, batch_size)
    }
}

impl<R: Read> ChunkedReader<R> {
    pub fn from_reader(input: R, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EtlError::Config("batch size must be positive".to_string()));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers = reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect::<Vec<_>>();

        Ok(ChunkedReader {
            reader,
            headers: Arc::new(headers),
            batch_size,
            next_index: 0,
            record: ByteRecord::new(),
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn read_batch(&mut self) -> Result<Option<RawBatch>> {
        let width = self.headers.len();
        let mut records = Vec::with_capacity(self.batch_size.min(PREALLOC_ROWS));
        let mut malformed_rows = 0;

        while records.len() < self.batch_size {
            if !self.reader.read_byte_record(&mut self.record)? {
                self.exhausted = true;
                break;
            }

            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            let found = self.record.len();
            if found != width {
                malformed_rows += 1;
                let issue = EtlError::MalformedRow {
                    line,
                    expected: width,
                    found,
                };
                warn!(line, expected = width, found, "{}", issue);
            }

            let values = coerce_width(
                self.record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned()),
                width,
            );
            records.push(RawRecord::new(line, values));
        }

        if records.is_empty() {
            return Ok(None);
        }

        let batch = RawBatch {
            index: self.next_index,
            headers: Arc::clone(&self.headers),
            records,
            malformed_rows,
        };
        self.next_index += 1;
        Ok(Some(batch))
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = Result<RawBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                // Not restartable after a read failure
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// ROW ESTIMATE
// ============================================================================

/// Count data lines (excluding the header) for progress reporting.
/// Any failure yields None; the run continues without a percentage.
pub fn estimate_total_rows(path: &Path) -> Option<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "row estimate unavailable");
            return None;
        }
    };

    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut lines: u64 = 0;
    let mut last_byte = b'\n';

    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "row estimate unavailable");
                return None;
            }
        };
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buf[buf.len() - 1];
        let consumed = buf.len();
        reader.consume(consumed);
    }

    // Final line without a trailing newline
    if last_byte != b'\n' {
        lines += 1;
    }

    Some(lines.saturating_sub(1))
}
