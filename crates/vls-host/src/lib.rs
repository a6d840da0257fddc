//! Lifecycle host for the Vue Language Server.
#![deny(missing_docs)]
//!
//! The crate supervises one `vls --stdio` process per completer: it decides
//! whether the completer can be enabled, launches the server with its stderr
//! captured to a log file, performs the connection handshake under a deadline,
//! and tears everything down again on stop or restart. Lifecycle transitions
//! are serialised by [`ServerSession`]; health queries stay lock-free with
//! respect to an in-flight start.
//!
//! Process creation sits behind [`ServerLauncher`] and executable discovery
//! behind [`ExecutableLocator`], so tests and embedders can substitute their
//! own implementations. Editor commands are resolved through
//! [`CommandRouter`] into a closed set of [`Operation`]s and executed by
//! [`VueCompleter`].

mod completer;
mod connection;
mod errors;
mod jsonrpc;
mod locator;
mod logfile;
mod process;
mod protocol;
mod router;
mod session;
mod sync;
pub mod telemetry;
mod transport;

pub use completer::{
    COMPLETER_NAME, DebugInfo, DebugInfoItem, SERVER_NAME, ServerDebugInfo, VueCompleter,
};
pub use connection::{
    Connection, Connector, NotificationSink, Notifier, PendingResponse, ResponseCallback,
    StdioConnector,
};
pub use errors::{CommandError, ConnectionError, LaunchError, ShutdownError, TransportError};
pub use jsonrpc::{
    ErrorReply, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, METHOD_NOT_FOUND, ServerRequest, next_request_id,
};
pub use locator::{
    Enablement, ExecutableLocator, ServerPaths, SystemLocator, bundled_server, should_enable,
};
pub use logfile::{STDERR_LOG_PREFIX, create_log_file, remove_if_exists};
pub use process::{
    LaunchCommand, ProcessHandle, STDIO_ARGS, ServerLauncher, ServerProcess, ServerStreams,
    SpawnedServer, SystemLauncher,
};
pub use protocol::{
    MAX_QUEUED_NOTIFICATIONS, NotificationQueue, ProtocolClient, ProtocolOperation,
    RequestContext, document_uri,
};
pub use router::{Command, CommandRouter, Operation};
pub use session::{ServerSession, ServerStatus, ShutdownReport, StartOutcome};
pub use transport::{FrameReader, FrameWriter, MAX_FRAME_BYTES};

#[cfg(test)]
mod tests;
