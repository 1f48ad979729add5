//! Structured logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging configuration.
///
/// # Environment Variables
///
/// | Variable | Description |
/// |----------|-------------|
/// | `FEEDGATE_LOG_FORMAT` | `pretty` or `json` |
/// | `FEEDGATE_LOG` | Filter directives, e.g. `feedgate=debug,info` |
/// | `FEEDGATE_LOG_FILE` | Append logs to this file instead of stderr |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directives.
    pub filter: String,
    /// Optional log file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(format) = std::env::var("FEEDGATE_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Ok(filter) = std::env::var("FEEDGATE_LOG") {
            self.filter = filter;
        }
        if let Ok(path) = std::env::var("FEEDGATE_LOG_FILE") {
            self.file = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        self
    }

    /// Raises the filter to debug for feedgate when `verbose` is set.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.filter = format!("{},feedgate=debug", self.filter);
        }
        self
    }

    /// Builds the `EnvFilter`, falling back to `info` on invalid directives.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("other"), LogFormat::Pretty);
    }

    #[test]
    fn test_verbose_adds_debug_directive() {
        let config = LoggingConfig::default().with_verbose(true);
        assert_eq!(config.filter, "info,feedgate=debug");
        assert_eq!(LoggingConfig::default().with_verbose(false).filter, "info");
    }

    #[test]
    fn test_toml_section() {
        let config: LoggingConfig = toml::from_str("format = \"json\"\nfile = \"/tmp/f.log\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter, "info");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/f.log")));
    }
}
