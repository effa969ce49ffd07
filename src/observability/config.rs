//! Logging configuration
//!
//! Loaded from environment variables:
//! - `RUST_LOG`: filter directives (default: `info`)
//! - `LAKECAT_LOG_FORMAT`: `text` (default) or `json`
//! - `LAKECAT_LOG_ANSI`: colored text output (default: true)

/// Output format of the fmt subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Unknown values fall back to text
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset or invalid
    pub default_directives: String,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Text,
            default_directives: "info".to_string(),
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let defaults = LogConfig::default();
        LogConfig {
            format: std::env::var("LAKECAT_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.format),
            default_directives: defaults.default_directives,
            ansi: std::env::var("LAKECAT_LOG_ANSI")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.ansi),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Text);
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::default().with_format(LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_directives, "info");
    }
}
