//! Default values for configuration options.

use crate::logging::LogFormat;

/// Default bound on the wait for the server connection, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default bound on the wait for the server process to exit, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 15;

/// Default bound on a forwarded protocol request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Runtime executable looked up on `PATH` to launch the server script.
pub const DEFAULT_RUNTIME_NAME: &str = "node";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default handshake timeout.
pub fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

/// Default shutdown timeout.
pub fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

/// Default request timeout.
pub fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Owned runtime name used by serde defaults.
pub fn default_runtime_name() -> String {
    DEFAULT_RUNTIME_NAME.to_string()
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
