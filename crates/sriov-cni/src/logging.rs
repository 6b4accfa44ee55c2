//! Log level vocabulary and subscriber setup.
//!
//! Levels follow the names CNI plugins traditionally accept in `logLevel`:
//! panic, error, warning, info, debug. Output goes to a file or stderr;
//! stdout is reserved for the plugin result.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sriov_cni_common::{VfError, VfResult};

/// Plugin log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Panic,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Panic => "panic",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Closest tracing level. `panic` keeps only errors.
    pub fn filter(&self) -> LevelFilter {
        match self {
            LogLevel::Panic | LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "panic" => Ok(LogLevel::Panic),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!(
                "unknown log level '{}' (expected panic, error, warning, info or debug)",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the effective level: request first, then settings, then `info`.
/// An unparsable value is skipped.
pub fn effective_level(request: Option<&str>, settings: &str) -> LogLevel {
    request
        .and_then(|l| l.parse().ok())
        .or_else(|| settings.parse().ok())
        .unwrap_or_default()
}

/// Installs the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn init(level: LogLevel, file: Option<&Path>) -> VfResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.filter().into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = match file {
        Some(path) => {
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| VfError::io(path, e))?;
            tracing::subscriber::set_global_default(
                builder
                    .with_ansi(false)
                    .with_writer(Mutex::new(log_file))
                    .finish(),
            )
        }
        None => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        ),
    };

    result.map_err(|e| VfError::config("logging", e.to_string()))
}
