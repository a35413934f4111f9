//! Logging infrastructure - structured tracing for the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - `allocator` and `ledger` targets for buffer lifecycle events (trace)
//! - a `call` span around every dispatched call (debug)
//! - console or daily-rotated file output, human-readable or JSON
//!
//! Nothing is emitted until `init` installs a subscriber; an extension
//! module loaded into a host that never asks for logs stays silent.

use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Minimum log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level `{}`", other)),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    #[default]
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Log file (rotated daily); standard error when unset
    pub file: Option<PathBuf>,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g., "ledger=trace,allocator=off")
    pub filter: Option<String>,
}

impl LogSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global logging system
///
/// Only the first call installs a subscriber; later calls return `None`.
/// The returned `WorkerGuard` flushes buffered output when dropped, so keep
/// it alive for as long as logs matter.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = build_filter(settings);

        let (layer, worker) = match &settings.file {
            Some(path) => {
                let directory = path.parent().map(PathBuf::from).unwrap_or_default();
                let prefix = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "typthon_bind.log".to_string());
                let (writer, worker) = tracing_appender::non_blocking(rolling::daily(directory, prefix));
                (build_layer(settings, writer), worker)
            }
            None => {
                let (writer, worker) = tracing_appender::non_blocking(std::io::stderr());
                (build_layer(settings, writer), worker)
            }
        };

        // Another subscriber may already own the process (e.g. an embedding application).
        if tracing_subscriber::registry().with(layer).with(filter).try_init().is_ok() {
            guard = Some(worker);
        }
    });
    guard
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn build_layer<W>(settings: &LogSettings, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_span_events(span_events_config(settings.span_events));

    match settings.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn build_filter(settings: &LogSettings) -> EnvFilter {
    let base = EnvFilter::builder()
        .with_default_directive(settings.level.as_level().into())
        .from_env_lossy();

    match &settings.filter {
        Some(directives) => directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(base, |filter, directive| match directive.parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => {
                    eprintln!("typthon_bind: ignoring invalid log directive `{}`", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}
