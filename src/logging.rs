//! Logging setup for xlens.
//!
//! Structured logging through the `tracing` ecosystem. Logs always go to
//! stderr: stdout is reserved for the JSON the CLI prints.
//!
//! # Usage
//!
//! ```rust
//! use xlens::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(account = "alice", "Bundle requested");
//! ```

use std::time::Instant;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: LogLevel,
    /// Output format for log messages.
    pub format: LogFormat,
    /// Include timestamps in log output.
    pub timestamps: bool,
    /// Include target (module path) in log output.
    pub target: bool,
    /// Include span close events with timings.
    pub spans: bool,
    /// Enable ANSI colors in output.
    pub colors: bool,
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    /// No logging at all.
    Off,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    Compact,
    /// Full format with thread and source location.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Errors only, no timestamps.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            spans: false,
            colors: true,
        }
    }

    /// Debug level with module targets.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            spans: false,
            colors: true,
        }
    }

    /// Everything, including span timings.
    #[must_use]
    pub const fn trace() -> Self {
        Self {
            level: LogLevel::Trace,
            format: LogFormat::Full,
            timestamps: true,
            target: true,
            spans: true,
            colors: true,
        }
    }

    #[must_use]
    pub const fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    fn filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("xlens={}", self.level.to_filter_string()))
        }
    }
}

impl LogLevel {
    const fn to_filter_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(Self::Pretty),
            "compact" | "c" => Ok(Self::Compact),
            "full" | "f" => Ok(Self::Full),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

/// Initialize the global subscriber. Later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let span_events = if config.spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);
    let registry = tracing_subscriber::registry().with(config.filter());

    // Each arm yields a differently typed layer, so each installs its own.
    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => registry.with(base.pretty()).try_init().ok(),
        (LogFormat::Pretty, false) => registry.with(base.pretty().without_time()).try_init().ok(),
        (LogFormat::Compact, true) => registry.with(base.compact()).try_init().ok(),
        (LogFormat::Compact, false) => registry.with(base.compact().without_time()).try_init().ok(),
        (LogFormat::Full, _) => registry
            .with(
                base.with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .ok(),
    };
}

/// Initialize logging for tests (silent unless `RUST_LOG` is set).
pub fn init_test_logging() {
    init_logging(&LogConfig {
        level: LogLevel::Off,
        ..LogConfig::default()
    });
}

/// Initialize logging with defaults suitable for CLI use.
pub fn init_cli_logging(quiet: bool, verbose: u8, colors: bool) {
    let config = match (quiet, verbose) {
        (true, _) => LogConfig::quiet(),
        (false, 0) => LogConfig::default(),
        (false, 1) => LogConfig::verbose(),
        (false, _) => LogConfig::trace(),
    };
    init_logging(&config.with_colors(colors));
}

/// Logs the start and outcome of one producer run.
pub struct OperationGuard {
    name: &'static str,
    account: String,
    start: Instant,
}

impl OperationGuard {
    pub fn new(name: &'static str, account: &str) -> Self {
        tracing::debug!(operation = name, account = %account, "Starting operation");
        Self {
            name,
            account: account.to_string(),
            start: Instant::now(),
        }
    }

    /// Log completion or failure from `result`, passing it through.
    pub fn finish<T, E: std::fmt::Display>(self, result: Result<T, E>) -> Result<T, E> {
        let duration_ms = self.start.elapsed().as_millis();
        match &result {
            Ok(_) => tracing::info!(
                operation = self.name,
                account = %self.account,
                duration_ms,
                "Operation completed"
            ),
            Err(error) => tracing::error!(
                operation = self.name,
                account = %self.account,
                duration_ms,
                error = %error,
                "Operation failed"
            ),
        }
        result
    }
}
