//! Editor-facing facade for Vue buffers.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use vls_config::Config;

use crate::errors::CommandError;
use crate::jsonrpc::JsonRpcNotification;
use crate::locator::{Enablement, ExecutableLocator, ServerPaths, should_enable};
use crate::process::{LaunchCommand, ServerLauncher, SystemLauncher};
use crate::protocol::RequestContext;
use crate::router::{CommandRouter, Operation};
use crate::session::{SESSION_TARGET, ServerSession, ShutdownReport};
use crate::telemetry;

/// Name reported in debug info.
pub const COMPLETER_NAME: &str = "Vue";

/// Server name reported in debug info.
pub const SERVER_NAME: &str = "Vue Language Server";

const SUPPORTED_FILETYPES: [&str; 1] = ["vue"];

/// Introspection data for the editor's debug view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInfo {
    /// Completer name.
    pub name: String,
    /// Supervised servers.
    pub servers: Vec<ServerDebugInfo>,
}

/// Debug view of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDebugInfo {
    /// Server name.
    pub name: String,
    /// Whether the process is alive.
    pub is_running: bool,
    /// Executable the server is launched from.
    pub executable: PathBuf,
    /// PID while running.
    pub pid: Option<u32>,
    /// Stderr capture files.
    pub logfiles: Vec<PathBuf>,
    /// Additional key/value details.
    pub extras: Vec<DebugInfoItem>,
}

/// A labelled debug value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInfoItem {
    /// Label.
    pub key: String,
    /// Value.
    pub value: String,
}

impl DebugInfoItem {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_owned(),
            value: value.into(),
        }
    }
}

/// Completer driving the Vue Language Server.
#[derive(Debug)]
pub struct VueCompleter {
    session: ServerSession,
    router: CommandRouter,
}

impl VueCompleter {
    /// Decides whether the completer should be created at all.
    #[must_use]
    pub fn should_enable(paths: &ServerPaths, locator: &dyn ExecutableLocator) -> Enablement {
        should_enable(paths, locator)
    }

    /// Creates the completer; the server starts on the first parse request.
    ///
    /// Installs the host's tracing subscriber through
    /// [`telemetry::initialise`] unless the embedding process already set one.
    #[must_use]
    pub fn new(config: Config, paths: &ServerPaths, launcher: Arc<dyn ServerLauncher>) -> Self {
        if let Err(error) = telemetry::initialise(&config) {
            debug!(target: SESSION_TARGET, %error, "keeping existing telemetry");
        }
        let command = LaunchCommand::stdio(&paths.server);
        Self {
            session: ServerSession::new(config, command, launcher),
            router: CommandRouter,
        }
    }

    /// Creates the completer with a launcher that spawns real processes.
    #[must_use]
    pub fn with_system_launcher(config: Config, paths: &ServerPaths) -> Self {
        Self::new(config, paths, Arc::new(SystemLauncher::new()))
    }

    /// File types this completer serves.
    #[must_use]
    pub fn supported_filetypes(&self) -> &'static [&'static str] {
        &SUPPORTED_FILETYPES
    }

    /// Starts the server if needed and sends the buffer once it is ready.
    ///
    /// # Errors
    ///
    /// Returns the error raised while synchronising the document.
    pub fn on_file_ready_to_parse(&self, context: &RequestContext) -> Result<(), CommandError> {
        self.session.start(context);
        if !self.session.is_ready() {
            debug!(target: SESSION_TARGET, "server not ready; document sync deferred");
            return Ok(());
        }
        let connection = self.session.connection().ok_or(CommandError::NotReady)?;
        self.session.protocol().sync_document(&connection, context)
    }

    /// Runs the editor command `name`.
    ///
    /// Lifecycle commands answer `null`; forwarded requests answer with the
    /// server's raw result.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::UnknownCommand`] for names outside the table,
    /// [`CommandError::NotReady`] when the server cannot take requests, or
    /// the error raised by the forwarded request.
    pub fn run_command(
        &self,
        name: &str,
        context: &RequestContext,
        args: &[String],
    ) -> Result<Value, CommandError> {
        match self.router.route(name)? {
            Operation::Passthrough(operation) => {
                if !self.session.is_ready() {
                    return Err(CommandError::NotReady);
                }
                let connection = self.session.connection().ok_or(CommandError::NotReady)?;
                self.session.protocol().request(
                    &connection,
                    operation,
                    context,
                    args,
                    self.session.config().request_timeout(),
                )
            }
            Operation::RestartServer => {
                let outcome = self.session.restart(context);
                debug!(target: SESSION_TARGET, ?outcome, "restart requested");
                Ok(Value::Null)
            }
            Operation::StopServer => {
                self.shutdown();
                Ok(Value::Null)
            }
        }
    }

    /// Command names for completion in the editor.
    #[must_use]
    pub fn defined_subcommands(&self) -> Vec<&'static str> {
        self.router.defined_subcommands()
    }

    /// Snapshot for the editor's debug view.
    #[must_use]
    pub fn debug_info(&self) -> DebugInfo {
        let mut extras = vec![DebugInfoItem::new(
            "Startup Status",
            self.session.status().to_string(),
        )];
        if let Some(failure) = self.session.last_failure() {
            extras.push(DebugInfoItem::new("Last Failure", failure));
        }

        DebugInfo {
            name: String::from(COMPLETER_NAME),
            servers: vec![ServerDebugInfo {
                name: String::from(SERVER_NAME),
                is_running: self.session.is_running(),
                executable: self.session.executable().to_path_buf(),
                pid: self.session.pid(),
                logfiles: self.session.log_file().into_iter().collect(),
                extras,
            }],
        }
    }

    /// Stops the server.
    pub fn shutdown(&self) -> ShutdownReport {
        let report = self.session.stop();
        if !report.is_clean() {
            warn!(
                target: SESSION_TARGET,
                errors = report.errors.len(),
                "Vue Language Server did not shut down cleanly"
            );
        }
        report
    }

    /// Whether the server process is alive.
    #[must_use]
    pub fn server_is_healthy(&self) -> bool {
        self.session.is_healthy()
    }

    /// Whether the server is alive and initialised.
    #[must_use]
    pub fn server_is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Server-issued commands are not supported.
    #[must_use]
    pub fn handle_server_command(&self, _context: &RequestContext, _command: &Value) -> Option<Value> {
        None
    }

    /// Drains notifications received since the last poll.
    #[must_use]
    pub fn poll_notifications(&self) -> Vec<JsonRpcNotification> {
        self.session.protocol().notifications().drain()
    }

    /// Underlying session.
    #[must_use]
    pub fn session(&self) -> &ServerSession {
        &self.session
    }
}
