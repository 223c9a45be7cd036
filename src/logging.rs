// SPDX-License-Identifier: MPL-2.0

//! Subscriber setup for the crate's `tracing` output.
//!
//! The library itself only emits events. Binaries and tests that want to see
//! them call [`init_logging`] once; later calls are ignored.

use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module path of each event.
    pub target: bool,
    pub colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    /// Compact plus thread names and source locations.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level with per-commit row counts and every skipped item.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            colors: true,
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

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            "off" | "none" => Ok(Self::Off),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "full" => Ok(Self::Full),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

/// Install a global subscriber. `RUST_LOG` wins over `config.level` when set.
pub fn init_logging(config: &LogConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("hangar_sync={}", config.level.to_filter_string()))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let base = fmt::layer()
        .with_ansi(config.colors)
        .with_target(config.target);

    // The fmt layer changes type with every option, hence one arm per shape.
    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => registry.with(base.pretty()).try_init().ok(),
        (LogFormat::Pretty, false) => registry.with(base.pretty().without_time()).try_init().ok(),
        (LogFormat::Compact, true) => registry.with(base.compact()).try_init().ok(),
        (LogFormat::Compact, false) => registry.with(base.compact().without_time()).try_init().ok(),
        (LogFormat::Full, _) => registry
            .with(
                base.with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .ok(),
    };
}

/// Capture output through the test harness; silent unless `RUST_LOG` is set.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("none".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Full);
    }

    #[test]
    fn test_verbose_preset() {
        let config = LogConfig::verbose();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.level.to_filter_string(), "debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("still alive");
    }
}
