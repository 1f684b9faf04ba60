//! Logging setup for applications embedding PoolKV.
//!
//! The engine itself only emits `tracing` events; nothing is printed unless
//! the application installs a subscriber. [`LogConfig`] installs one with
//! an `EnvFilter` (so `RUST_LOG` always wins over the configured level),
//! writing to stdout, a daily-rolling file, or both.
//!
//! Useful targets: `poolkv_heap` (recovery, checkpoints, per-commit
//! debug events), `poolkv_storage` (backend open/close), `poolkv_wal`.

use poolkv_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name used when the configured log path has none
const DEFAULT_LOG_FILE: &str = "poolkv.log";

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a daily-rolling file
    File(PathBuf),
    /// Output to both stdout and file
    Both(PathBuf),
}

/// Log format style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format
    Pretty,
    /// Compact single-line format (default)
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `poolkv_heap=debug,info`
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Compact,
        }
    }
}

impl LogConfig {
    /// Info level to stdout
    pub fn info() -> Self {
        Self::default()
    }

    /// Debug level to stdout; logs every committed heap transaction
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Warnings only (torn log tails, failed close on drop)
    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Set log output to file with rotation
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Set log output to both stdout and file
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the filter directive
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", self.level, e))),
        }
    }

    /// Install this configuration as the global subscriber.
    ///
    /// Returns the file writer's guard when logging to a file; keep it
    /// alive for as long as logs should be written.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the level does not parse or a global subscriber
    /// is already installed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use poolkv::logging::LogConfig;
    ///
    /// let _guard = LogConfig::info().with_both("/var/log/poolkv/engine.log").init()?;
    /// # Ok::<(), poolkv::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let filter = self.env_filter()?;
        let registry = tracing_subscriber::registry().with(filter);

        let (result, guard) = match (&self.output, self.format) {
            (LogOutput::Stdout, LogFormat::Pretty) => {
                (registry.with(fmt::layer().pretty()).try_init(), None)
            }
            (LogOutput::Stdout, LogFormat::Compact) => {
                (registry.with(fmt::layer().compact()).try_init(), None)
            }
            (LogOutput::File(path), LogFormat::Pretty) => {
                let (writer, guard) = file_writer(path);
                let layer = fmt::layer().with_writer(writer).with_ansi(false).pretty();
                (registry.with(layer).try_init(), Some(guard))
            }
            (LogOutput::File(path), LogFormat::Compact) => {
                let (writer, guard) = file_writer(path);
                let layer = fmt::layer().with_writer(writer).with_ansi(false).compact();
                (registry.with(layer).try_init(), Some(guard))
            }
            (LogOutput::Both(path), _) => {
                // Both sinks share the compact format
                let (writer, guard) = file_writer(path);
                let result = registry
                    .with(fmt::layer().compact())
                    .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
                    .try_init();
                (result, Some(guard))
            }
        };

        result.map_err(|e| Error::Config(format!("logging already initialised: {}", e)))?;
        Ok(guard)
    }
}

fn file_writer(path: &Path) -> (NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.output, LogOutput::Stdout);
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::debug()
            .with_file("/tmp/poolkv.log")
            .with_format(LogFormat::Pretty);
        assert_eq!(config.level, "debug");
        assert!(matches!(config.output, LogOutput::File(_)));
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_invalid_level_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = LogConfig::default()
            .with_level("poolkv=notalevel")
            .init()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
