//! Observability: structured logging and metrics.

mod logging;
mod metrics;

pub use self::logging::{LogFormat, LoggingConfig};
pub use self::metrics::{MetricsConfig, MetricsHandle, install_prometheus};

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Full observability configuration.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Handle for observability runtime components.
#[derive(Debug, Default)]
pub struct ObservabilityHandle {
    metrics: Option<MetricsHandle>,
}

impl ObservabilityHandle {
    /// Returns the metrics handle when metrics are enabled.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }
}

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initializes logging and metrics for the process.
///
/// Logs go to stderr, or to `logging.file` without ANSI colors when set.
/// Stderr output in pretty format is multi-line; file output is compact.
///
/// # Errors
///
/// Returns an error on a second call, or if the log file cannot be opened or
/// the metrics recorder cannot be installed.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if INITIALIZED.get().is_some() {
        return Err(init_failed("observability already initialized"));
    }

    let to_file = config.logging.file.is_some();
    let writer = match &config.logging.file {
        Some(path) => BoxMakeWriter::new(open_log_file(path)?),
        None => BoxMakeWriter::new(io::stderr),
    };
    let layer = match config.logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty if to_file => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(true)
            .boxed(),
    };

    let metrics = install_prometheus(&config.metrics, config.metrics_expose)?;
    tracing_subscriber::registry()
        .with(layer)
        .with(config.logging.env_filter())
        .try_init()
        .map_err(|e| init_failed(e.to_string()))?;

    INITIALIZED
        .set(())
        .map_err(|()| init_failed("observability initialized concurrently"))?;
    tracing::debug!(format = ?config.logging.format, to_file, "Logging initialized");

    Ok(ObservabilityHandle { metrics })
}

fn init_failed(cause: impl Into<String>) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: cause.into(),
    }
}

/// Appending log file shared by every event writer.
#[derive(Clone)]
struct LogFileWriter(Arc<Mutex<File>>);

impl LogFileWriter {
    fn file(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.0.lock().map_err(|e| io::Error::other(e.to_string()))
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    let io_failed = |operation: &str, e: io::Error| Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_failed("create_log_dir", e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_failed("open_log_file", e))?;
    Ok(LogFileWriter(Arc::new(Mutex::new(file))))
}
