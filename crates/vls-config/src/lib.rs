//! Configuration shared by the Vue language server host.
#![deny(missing_docs)]
//!
//! The editor daemon hands every completer a JSON object of user options.
//! [`Config`] picks out the keys the language server host understands and
//! fills everything else from the defaults in [`defaults`]. Unknown keys are
//! ignored so the same options object can be shared with other completers.

pub mod defaults;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_RUNTIME_NAME, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Options controlling how the language server is launched and supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Retain the captured stderr log after the server shuts down.
    #[serde(default)]
    pub server_keep_logfiles: bool,
    /// Bound on the wait for the server connection.
    #[serde(default = "defaults::default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Bound on the wait for the server process to exit during shutdown.
    #[serde(default = "defaults::default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Bound on forwarded protocol requests.
    #[serde(default = "defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Explicit path to the server entry script.
    #[serde(default)]
    pub server_path: Option<PathBuf>,
    /// Runtime executable used to run the server script.
    #[serde(default = "defaults::default_runtime_name")]
    pub runtime_name: String,
    /// Directory receiving stderr logs; the system temp dir when unset.
    #[serde(default)]
    pub log_directory: Option<PathBuf>,
    /// `tracing` filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_keep_logfiles: false,
            handshake_timeout_ms: defaults::default_handshake_timeout_ms(),
            shutdown_timeout_secs: defaults::default_shutdown_timeout_secs(),
            request_timeout_secs: defaults::default_request_timeout_secs(),
            server_path: None,
            runtime_name: defaults::default_runtime_name(),
            log_directory: None,
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Parses the editor's user options object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when a recognised key has the wrong type.
    pub fn from_user_options(options: &serde_json::Value) -> Result<Self, ConfigError> {
        Self::deserialize(options).map_err(ConfigError::Parse)
    }

    /// Whether stderr logs survive shutdown.
    #[must_use]
    pub fn keep_logfiles(&self) -> bool {
        self.server_keep_logfiles
    }

    /// Handshake deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Deadline for the server process to exit.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Deadline for forwarded protocol requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Explicit server script path, if configured.
    #[must_use]
    pub fn server_path(&self) -> Option<&Path> {
        self.server_path.as_deref()
    }

    /// Runtime executable name.
    #[must_use]
    pub fn runtime_name(&self) -> &str {
        self.runtime_name.as_str()
    }

    /// Directory receiving stderr logs.
    #[must_use]
    pub fn log_directory(&self) -> PathBuf {
        self.log_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Configured log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A recognised option carried a value of the wrong shape.
    #[error("invalid user options: {0}")]
    Parse(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn default_timeouts_match_constants() {
        let config = Config::default();

        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(15));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("COMPACT", LogFormat::Compact)]
    fn parses_log_format_case_insensitively(#[case] input: &str, #[case] expected: LogFormat) {
        assert_eq!(LogFormat::from_str(input).ok(), Some(expected));
    }

    #[rstest]
    fn log_directory_falls_back_to_temp_dir() {
        let config = Config::default();

        assert_eq!(config.log_directory(), std::env::temp_dir());
    }
}
