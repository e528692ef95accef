//! # Daemon Logging
//!
//! `tracing-subscriber` setup for the `drive-sync` binary. Output goes to
//! stderr in one of three formats, filtered per crate with `EnvFilter`
//! directives; an optional [`LoggerSink`] receives a copy of every event with
//! credential-like fields redacted.
//!
//! Only the binary calls [`init_logging`]. The library crates emit `tracing`
//! events and never install a subscriber themselves.
//!
//! ```ignore
//! use bridge_traits::time::LogLevel;
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Json)
//!         .with_level(LogLevel::Debug),
//! )?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates logged at the configured level; everything else stays at `warn`.
const WORKSPACE_CRATES: &[&str] = &[
    "drive_sync",
    "core_runtime",
    "core_store",
    "core_sync",
    "provider_google_drive",
    "bridge_desktop",
];

/// Chatty dependencies pinned to `warn` even when the workspace is verbose.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx", "hyper", "h2", "reqwest"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading at a terminal
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
    /// One line per event
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::Config(format!(
                "unknown log format {:?} (expected pretty, json or compact)",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for the workspace crates
    pub level: LogLevel,
    /// Complete `EnvFilter` directive string; replaces the per-crate default
    pub filter: Option<String>,
    pub sink: Option<Arc<dyn LoggerSink>>,
    /// Print the event target (module path) in each line
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            sink: None,
            show_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("sink", &self.sink.is_some())
            .field("show_target", &self.show_target)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(LoggerSinkLayer::new(config.sink.clone()));
    let output = tracing_subscriber::fmt::layer()
        .with_target(config.show_target)
        .with_writer(io::stderr);

    let installed = match config.format {
        LogFormat::Pretty => registry.with(output.pretty()).try_init(),
        LogFormat::Json => registry
            .with(output.json().flatten_event(true).with_current_span(true))
            .try_init(),
        LogFormat::Compact => registry.with(output.compact()).try_init(),
    };

    installed.map_err(|e| Error::Logging(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = to_tracing_level(config.level).as_str().to_ascii_lowercase();
            std::iter::once("warn".to_string())
                .chain(WORKSPACE_CRATES.iter().map(|c| format!("{c}={level}")))
                .chain(QUIET_DEPENDENCIES.iter().map(|c| format!("{c}=warn")))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(directives)
        .map_err(|e| Error::Logging(format!("invalid filter directive: {}", e)))
}

fn to_tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

fn from_tracing_level(level: Level) -> LogLevel {
    match level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

/// Copies events into a [`LoggerSink`].
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
    /// Drives the sink for events emitted outside any tokio runtime.
    fallback: OnceLock<Option<tokio::runtime::Runtime>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self {
            sink,
            fallback: OnceLock::new(),
        }
    }

    fn deliver(&self, sink: Arc<dyn LoggerSink>, entry: LogEntry) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = sink.log(entry).await {
                    eprintln!("log sink rejected entry: {}", e);
                }
            });
            return;
        }

        let runtime = self.fallback.get_or_init(|| {
            tokio::runtime::Builder::new_current_thread().build().ok()
        });
        if let Some(runtime) = runtime {
            if let Err(e) = runtime.block_on(sink.log(entry)) {
                eprintln!("log sink rejected entry: {}", e);
            }
        }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let meta = event.metadata();
        let level = from_tracing_level(*meta.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields.message.take().unwrap_or_else(|| meta.name().to_string());
        let mut entry = LogEntry::new(level, meta.target(), message);
        for (name, value) in fields.values {
            entry = entry.with_field(name, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_field("span", span.name());
        }

        self.deliver(Arc::clone(sink), entry);
    }
}

/// Gathers an event's fields as strings. Non-string values go through
/// `record_debug`, which the other `Visit` methods default to.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Vec<(&'static str, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.values
                .push((field.name(), redact_if_sensitive(field.name(), value)));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

const SENSITIVE_NAME_PARTS: &[&str] = &["token", "secret", "password", "authorization", "api_key"];

/// `value`, or `[REDACTED]` when `field_name` looks like it holds a
/// credential (access tokens, page tokens, authorization headers).
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let name = field_name.to_ascii_lowercase();
    if SENSITIVE_NAME_PARTS.iter().any(|part| name.contains(part)) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}
