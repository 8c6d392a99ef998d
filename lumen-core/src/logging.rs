//! Logging setup for the lumen stack, built on the `tracing` ecosystem.
//!
//! Two entry points: [`init_minimal_logging`] for tests and early startup,
//! and [`initialize_logging`] which configures console plus optional file
//! output from a [`LoggingConfig`].

use crate::config::LoggingConfig;
use crate::error::CoreError;

use once_cell::sync::Lazy;
use std::io::stdout;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and for early application startup before configuration
/// is loaded. Filters via `RUST_LOG`, defaulting to "info". Errors (e.g. a
/// global subscriber already being set) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Holds the `WorkerGuard` of the non-blocking file writer for the lifetime
/// of the process so buffered log lines get flushed.
static LOG_WORKER_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

fn create_file_layer(
    log_path: &Path,
    format: &str,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync + 'static>, WorkerGuard), CoreError> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_appender = tracing_appender::rolling::daily(
        log_path.parent().unwrap_or_else(|| Path::new(".")),
        log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("lumen.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer: Box<dyn Layer<Registry> + Send + Sync + 'static> =
        if format.eq_ignore_ascii_case("json") {
            Box::new(fmt::layer().json().with_writer(writer).with_ansi(false))
        } else {
            Box::new(fmt::layer().with_writer(writer).with_ansi(false))
        };
    Ok((layer, guard))
}

/// Initializes the global logging system from the provided [`LoggingConfig`].
///
/// Installs a console layer and, when `file_path` is set, a non-blocking file
/// layer whose worker guard is parked in a process-global slot.
///
/// # Errors
///
/// Returns [`CoreError::LoggingInitialization`] when the configured level is
/// invalid or a global subscriber is already installed.
pub fn initialize_logging(config: &LoggingConfig) -> Result<(), CoreError> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        invalid => {
            return Err(CoreError::LoggingInitialization(format!(
                "invalid log level in config: {}",
                invalid
            )))
        }
    };

    let stdout_layer: Box<dyn Layer<Registry> + Send + Sync + 'static> =
        if config.format.eq_ignore_ascii_case("json") {
            Box::new(
                fmt::layer()
                    .json()
                    .with_writer(stdout)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(level.to_string())),
            )
        } else {
            Box::new(
                fmt::layer()
                    .with_writer(stdout)
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_filter(EnvFilter::new(level.to_string())),
            )
        };

    let mut layers = vec![stdout_layer];
    let mut new_guard: Option<WorkerGuard> = None;
    if let Some(log_path) = &config.file_path {
        let (file_layer, guard) = create_file_layer(log_path, &config.format)?;
        layers.push(Box::new(
            file_layer.with_filter(EnvFilter::new(level.to_string())),
        ));
        new_guard = Some(guard);
    }

    let result = Registry::default().with(layers).try_init();

    if let Ok(mut slot) = LOG_WORKER_GUARD.lock() {
        *slot = new_guard;
    }

    result.map_err(|e| {
        CoreError::LoggingInitialization(format!(
            "failed to set global tracing subscriber (already initialized?): {}",
            e
        ))
    })
}
