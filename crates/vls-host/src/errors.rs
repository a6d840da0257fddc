//! Error types for each layer of the host.
//!
//! None of these cross the lifecycle boundary: `start` and `stop` log them and
//! report outcomes instead. Only [`CommandError`] reaches the editor-facing
//! command layer, and it does so as an ordinary `Result`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Framing errors on the server's byte streams.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header block ended without a `Content-Length`.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` value did not parse.
    #[error("invalid header format")]
    InvalidHeader,

    /// The announced payload exceeds what the reader accepts.
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced `Content-Length`.
        length: usize,
        /// Largest accepted payload.
        limit: usize,
    },
}

/// Failures while launching the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable does not exist.
    #[error("language server binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The OS refused to start the process.
    #[error("failed to spawn language server process: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The stderr log file could not be prepared.
    #[error("failed to create log file in '{directory}': {source}")]
    LogFile {
        /// Directory the log was to be created in.
        directory: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The spawned process did not expose one of its standard streams.
    #[error("language server process has no {stream} pipe")]
    MissingPipe {
        /// Name of the missing stream.
        stream: &'static str,
    },
}

/// Failures on the message channel to the server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No handshake acknowledgement, or no response, before the deadline.
    #[error("timed out after {timeout_ms}ms waiting for the language server")]
    Timeout {
        /// The deadline that elapsed, in milliseconds.
        timeout_ms: u128,
    },

    /// The connection was closed or its reader has stopped.
    #[error("language server connection is closed")]
    Closed,

    /// Framing or stream failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialisation or deserialisation failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A background thread could not be started.
    #[error("failed to start connection thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The server answered with a JSON-RPC error.
    #[error("server returned error: {message} (code: {code})")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },
}

impl ConnectionError {
    /// Builds a timeout error for the supplied deadline.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis(),
        }
    }

    /// Whether this is the distinct handshake/request timeout condition.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A single failed step of the best-effort shutdown sequence.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The `shutdown` request failed or went unanswered.
    #[error("shutdown request failed: {0}")]
    Request(#[source] ConnectionError),

    /// The `exit` notification could not be written.
    #[error("exit notification failed: {0}")]
    Exit(#[source] ConnectionError),

    /// The process outlived the termination deadline and was killed.
    #[error("process {pid} did not exit within {timeout_secs}s")]
    TerminationTimeout {
        /// PID of the stubborn process.
        pid: u32,
        /// The deadline that elapsed, in seconds.
        timeout_secs: u64,
    },

    /// Querying or killing the process failed.
    #[error("failed to terminate process: {0}")]
    Process(#[source] io::Error),
}

/// Errors returned to the editor-facing command layer.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command name is not in the table.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command needs an argument that was not supplied.
    #[error("{command} requires an argument: {argument}")]
    MissingArgument {
        /// Command that was invoked.
        command: &'static str,
        /// Description of the missing argument.
        argument: &'static str,
    },

    /// The server is not running or has not finished initialising.
    #[error("Vue Language Server is not ready")]
    NotReady,

    /// The request context does not name a usable file.
    #[error("cannot build a document URI for '{0}'")]
    InvalidPath(PathBuf),

    /// The forwarded request failed.
    #[error("request failed: {0}")]
    Request(#[from] ConnectionError),
}
