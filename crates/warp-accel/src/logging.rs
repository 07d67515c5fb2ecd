//! Tracing subscriber setup for binaries and tests embedding the shim
//!
//! The library only emits events. Installing a subscriber needs the
//! `logging` feature.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
#[cfg(feature = "logging")]
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Log levels compatible with tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(Error::InvalidConfig(format!("Invalid log level: {s}"))),
        }
    }
}

/// Output format for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level when `RUST_LOG` is unset or empty
    pub level: LogLevel,
    /// Event layout
    pub format: LogFormat,
    /// Print the module path of each event
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Filter directive to install, given the value of `RUST_LOG`
    #[must_use]
    pub fn directive(&self, env: Option<&str>) -> String {
        match env.map(str::trim) {
            Some(directive) if !directive.is_empty() => directive.to_string(),
            _ => self.level.to_string(),
        }
    }
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `config.level`; an unparsable value
/// falls back to the level. Installing twice is an error.
#[cfg(feature = "logging")]
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::try_new(config.directive(env.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr);
    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|e| Error::InvalidConfig(format!("logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_display_roundtrip() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
        assert_eq!(LogLevel::Warn.to_tracing_level(), Level::WARN);
    }

    #[test]
    fn test_directive_prefers_env() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..LogConfig::default()
        };
        assert_eq!(config.directive(None), "debug");
        assert_eq!(config.directive(Some("")), "debug");
        assert_eq!(config.directive(Some("  ")), "debug");
        assert_eq!(config.directive(Some("warp_accel=trace")), "warp_accel=trace");
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = LogConfig {
            level: LogLevel::Warn,
            format: LogFormat::Pretty,
            include_target: false,
        };
        let text = toml::to_string(&config).unwrap();
        let back: LogConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.level, LogLevel::Warn);
        assert_eq!(back.format, LogFormat::Pretty);
        assert!(!back.include_target);
    }

    #[test]
    fn test_no_subscriber_installed_by_library() {
        tracing::info!("emitted without a subscriber");
        let silent = tracing::dispatcher::get_default(|dispatch| {
            dispatch.is::<tracing::subscriber::NoSubscriber>()
        });
        assert!(silent);
    }
}
