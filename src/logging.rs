// Logging - tracing subscriber setup for the binary
//
// Console output is human-readable text or JSON. An optional directory adds a
// daily-rolling JSON file. RUST_LOG overrides the default filter.

use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "sales_etl=info";
const LOG_FILE_PREFIX: &str = "sales-etl.log";

/// Install the global subscriber. The returned guard must be held until exit
/// so buffered file output gets flushed. Calling twice is a no-op.
pub fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match log_dir {
        Some(dir) => match fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (Some(fmt::layer().json().with_writer(writer)), Some(guard))
            }
            Err(e) => {
                eprintln!("cannot create log directory '{}': {}", dir.display(), e);
                (None, None)
            }
        },
        None => (None, None),
    };

    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        let dir = TempDir::new().unwrap();

        let guard = init_logging(true, Some(dir.path()));
        let again = init_logging(false, None);

        assert!(guard.is_some());
        assert!(again.is_none());
    }
}
