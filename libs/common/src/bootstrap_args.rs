//! Common command-line arguments for modqtt services
//!
//! Binaries flatten `ServiceArgs` into their own argument struct.

#[cfg(feature = "cli")]
use clap::Args;
use std::path::PathBuf;

/// Common service startup arguments
///
/// Logging, output and validation switches shared by every binary.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        arg(short = 'l', long, default_value = "info", env = "MODQTT_LOG_LEVEL")
    )]
    pub log_level: String,

    /// Directory for daily rolling log files (console only when unset)
    #[cfg_attr(feature = "cli", arg(long))]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,

    /// Suppress the per-cycle decoded record dump
    #[cfg_attr(feature = "cli", arg(short = 'q', long))]
    pub quiet: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            no_color: false,
            validate: false,
            quiet: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Check if running with verbose diagnostics
    pub fn is_development(&self) -> bool {
        matches!(self.parse_log_level(), tracing::Level::DEBUG | tracing::Level::TRACE)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(!args.quiet);
        assert!(!args.validate);
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::DEBUG);

        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_is_development() {
        assert!(!ServiceArgs::default().is_development());

        let args = ServiceArgs {
            log_level: "trace".to_string(),
            ..Default::default()
        };
        assert!(args.is_development());
    }
}
