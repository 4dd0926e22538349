//! Tracing setup for a hashmirror run
//!
//! Console output goes through the progress bars and respects `-v`. A full
//! trace of the same run is written to `hashmirror-<uuid>.log` in the
//! platform temp dir so a failed backup can be inspected afterwards.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::progress::ProgressWriter;

/// Trace file filter used when `RUST_LOG` is unset
const DEFAULT_FILE_FILTER: &str = "warn,hashmirror=trace,hashmirror_core=trace";

/// The per-run trace file. Dropping this flushes and closes it.
pub struct SessionLog {
    pub path: PathBuf,
    _writer: tracing_appender::non_blocking::WorkerGuard,
}

fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Install the global subscriber. Hold the returned [`SessionLog`] until
/// the program exits.
pub fn init(verbose: bool) -> SessionLog {
    let dir = std::env::temp_dir();
    let file_name = format!("hashmirror-{}.log", uuid::Uuid::new_v4());
    let path = dir.join(&file_name);

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));

    let trace_file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    let console = tracing_subscriber::fmt::layer()
        .with_writer(ProgressWriter)
        .with_target(false)
        .with_filter(console_level(verbose));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILE_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(trace_file)
        .with(console)
        .init();

    SessionLog {
        path,
        _writer: guard,
    }
}
