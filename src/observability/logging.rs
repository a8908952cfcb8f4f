//! Structured logging configuration.

use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format.
pub const ENV_LOG_FORMAT: &str = "DUPREQ_LOG_FORMAT";
/// Environment variable naming a log file.
pub const ENV_LOG_FILE: &str = "DUPREQ_LOG_FILE";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level filter.
    pub filter: EnvFilter,
    /// Optional file to append to instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from the environment.
    ///
    /// `RUST_LOG` takes precedence over the default directive, which is
    /// `dupreq=info`, or `dupreq=debug` when `verbose` is set.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let file = std::env::var(ENV_LOG_FILE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            format,
            filter: default_filter(verbose),
            file,
        }
    }

    /// Overrides the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    let directive = if verbose { "dupreq=debug" } else { "dupreq=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}
