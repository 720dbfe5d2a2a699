//! Tracing setup: stdout plus an optional daily log file.

use std::{fs, io};

use tracing::{Level, Subscriber};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling,
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{time::ChronoUtc, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOG_FILE_PREFIX: &str = "inference-gateway";
const CRATE_TARGET: &str = "inference_gateway";
/// Target of the structured usage events
pub const USAGE_LOG_TARGET: &str = "usage";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// One JSON object per event instead of coloured text
    pub json: bool,
    /// Also write to a daily-rotated file in this directory
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            log_dir: None,
        }
    }
}

/// Keeps the background file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Parse a level name as given on the command line.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Filter used when `RUST_LOG` is unset: gateway events and usage records.
fn default_directives(level: Level) -> String {
    let level = level.to_string().to_ascii_lowercase();
    format!("{CRATE_TARGET}={level},{USAGE_LOG_TARGET}={level}")
}

fn fmt_layer<S, W>(writer: W, json: bool, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()));

    if json {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(dir: &str) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    Ok(tracing_appender::non_blocking(rolling::daily(
        dir,
        LOG_FILE_PREFIX,
    )))
}

pub fn init_logging(config: LoggingConfig) -> LogGuard {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

    let mut layers = vec![fmt_layer(io::stdout, config.json, !config.json)];
    let mut file_guard = None;
    if let Some(dir) = &config.log_dir {
        match file_writer(dir) {
            Ok((writer, guard)) => {
                layers.push(fmt_layer(writer, config.json, false));
                file_guard = Some(guard);
            }
            // The subscriber is not installed yet
            Err(e) => eprintln!("Failed to open log directory {}: {}", dir, e),
        }
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();

    LogGuard { _file: file_guard }
}
