//! Tracing subscriber setup for hosts.
//!
//! The library itself only emits `tracing` events. Hosts that have no
//! subscriber of their own can call [`init_logging`] once at startup.
//!
//! ```ignore
//! let _guard = overcast::logging::init_logging(&LoggingConfig::default())?;
//! ```
//!
//! When `RUST_LOG` is set it takes precedence over the configured filter.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::LoggingError;

/// Default filter directive.
pub const DEFAULT_FILTER: &str = "overcast=info";

/// Default log file name inside `log_dir`.
pub const DEFAULT_LOG_FILE: &str = "overcast.log";

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `overcast=debug`.
    pub filter: String,
    /// Also write to `<log_dir>/<log_file>` when set.
    pub log_dir: Option<PathBuf>,
    /// File name used inside `log_dir`.
    pub log_file: String,
    /// Write to stderr.
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            log_dir: None,
            log_file: DEFAULT_LOG_FILE.to_string(),
            stderr: true,
        }
    }
}

/// Build the filter: `RUST_LOG` if present, else the configured directive.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !directive.trim().is_empty() => Ok(EnvFilter::try_new(directive)?),
        _ => Ok(EnvFilter::try_new(&config.filter)?),
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when file output is enabled; keep it alive
/// for as long as logs should be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(config)?;

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(LocalTime::rfc_3339())
            .with_target(true)
            .boxed()
    });

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, &config.log_file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::rfc_3339())
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(guard)
}
