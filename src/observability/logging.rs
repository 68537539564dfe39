//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable with a crate-specific filter directive.
const LOG_ENV: &str = "BLOCKCACHE_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the configuration from settings and the environment.
    ///
    /// Filter precedence: `BLOCKCACHE_LOG`, then `RUST_LOG`, then `verbose`
    /// (which forces `debug`), then the configured level, then `info`.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let directive = std::env::var(LOG_ENV)
            .ok()
            .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
            .filter(|v| !v.trim().is_empty())
            .or_else(|| verbose.then(|| "debug".to_string()))
            .or_else(|| settings.level.clone())
            .unwrap_or_else(|| "info".to_string());

        Self {
            format: settings.format,
            filter: build_filter(&directive),
            file: settings.file.clone(),
        }
    }
}

/// Parses `directive`, falling back to `info` if it is malformed.
fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|e| {
        tracing::warn!(directive, error = %e, "Invalid log filter, using info");
        EnvFilter::new("info")
    })
}
