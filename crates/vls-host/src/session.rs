//! Lifecycle of the language server process and its connection.
//!
//! A [`ServerSession`] owns at most one server process and one connection.
//! Every mutation goes through a single lifecycle mutex: only the public
//! [`ServerSession::start`], [`ServerSession::stop`] and
//! [`ServerSession::restart`] acquire it, and they delegate to `*_locked`
//! helpers that expect the guard to be held. Restart therefore runs stop and
//! start inside one critical section.
//!
//! Health queries never touch the lifecycle mutex. The current process handle,
//! connection and status are published into a separate snapshot lock so that
//! [`ServerSession::is_healthy`] answers immediately even while a start is
//! waiting on the handshake.
//!
//! Failures never escape as errors. Start reports a [`StartOutcome`] and stop a
//! [`ShutdownReport`]; both log what went wrong.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn};
use vls_config::Config;

use crate::connection::Connection;
use crate::errors::ShutdownError;
use crate::logfile::{STDERR_LOG_PREFIX, create_log_file, remove_if_exists};
use crate::process::{LaunchCommand, ProcessHandle, ServerLauncher};
use crate::protocol::{ProtocolClient, RequestContext};
use crate::sync::{lock, read, write};

/// Log target for lifecycle operations.
pub(crate) const SESSION_TARGET: &str = "vls_host::session";

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServerStatus {
    /// No process; a start is legal.
    #[default]
    NotStarted,
    /// A start is in progress.
    Starting,
    /// The handshake completed and `initialize` was sent.
    Running,
    /// A stop is in progress.
    Stopping,
    /// The process is gone; cleanup is about to run.
    Stopped,
    /// The launch failed; held until the next stop or restart.
    Failed(String),
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("Not started"),
            Self::Starting => f.write_str("Starting"),
            Self::Running => f.write_str("Running"),
            Self::Stopping => f.write_str("Stopping"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A process was launched and `initialize` sent.
    Started,
    /// A start had already run since the last cleanup; nothing was done.
    AlreadyStarted,
    /// The process could not be launched or died immediately.
    LaunchFailed,
    /// The handshake deadline passed; the session was torn down.
    HandshakeTimedOut,
}

/// What happened during a best-effort stop.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// PID of the process that was stopped, if one was running.
    pub pid: Option<u32>,
    /// Whether the process had to be killed.
    pub killed: bool,
    /// Every step that failed, in order.
    pub errors: Vec<ShutdownError>,
}

impl ShutdownReport {
    /// Whether a process was running when the stop began.
    #[must_use]
    pub fn was_running(&self) -> bool {
        self.pid.is_some()
    }

    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct Lifecycle {
    process: Option<Arc<ProcessHandle>>,
    connection: Option<Arc<Connection>>,
    log_file: Option<PathBuf>,
}

#[derive(Default)]
struct Snapshot {
    status: ServerStatus,
    process: Option<Arc<ProcessHandle>>,
    connection: Option<Arc<Connection>>,
    log_file: Option<PathBuf>,
    last_failure: Option<String>,
}

/// One supervised language server.
pub struct ServerSession {
    config: Config,
    command: LaunchCommand,
    launcher: Arc<dyn ServerLauncher>,
    protocol: ProtocolClient,
    started: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    snapshot: RwLock<Snapshot>,
}

impl ServerSession {
    /// Creates a session in [`ServerStatus::NotStarted`].
    #[must_use]
    pub fn new(config: Config, command: LaunchCommand, launcher: Arc<dyn ServerLauncher>) -> Self {
        Self {
            config,
            command,
            launcher,
            protocol: ProtocolClient::new(),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::default()),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Launches the server unless a start already ran since the last cleanup.
    pub fn start(&self, context: &RequestContext) -> StartOutcome {
        let mut lifecycle = lock(&self.lifecycle);
        self.start_locked(&mut lifecycle, context)
    }

    /// Stops the server, if any, and cleans up. Safe to call at any time.
    pub fn stop(&self) -> ShutdownReport {
        let mut lifecycle = lock(&self.lifecycle);
        self.stop_locked(&mut lifecycle)
    }

    /// Stops then starts the server without releasing the lifecycle lock.
    pub fn restart(&self, context: &RequestContext) -> StartOutcome {
        let mut lifecycle = lock(&self.lifecycle);
        let report = self.stop_locked(&mut lifecycle);
        debug!(
            target: SESSION_TARGET,
            clean = report.is_clean(),
            "restarting Vue Language Server"
        );
        self.start_locked(&mut lifecycle, context)
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle, context: &RequestContext) -> StartOutcome {
        if self.started.load(Ordering::SeqCst) {
            debug!(target: SESSION_TARGET, "start skipped: already started");
            return StartOutcome::AlreadyStarted;
        }
        self.started.store(true, Ordering::SeqCst);
        self.set_status(ServerStatus::Starting);
        info!(
            target: SESSION_TARGET,
            program = %self.command.program.display(),
            "starting Vue Language Server"
        );

        let (stderr, log_file) =
            match create_log_file(&self.config.log_directory(), STDERR_LOG_PREFIX) {
                Ok(created) => created,
                Err(error) => return self.launch_failed(&error.to_string()),
            };
        lifecycle.log_file = Some(log_file.clone());
        write(&self.snapshot).log_file = Some(log_file);

        let spawned = match self.launcher.spawn(&self.command, stderr) {
            Ok(spawned) => spawned,
            Err(error) => return self.launch_failed(&error.to_string()),
        };
        let process = Arc::new(spawned.handle);
        lifecycle.process = Some(Arc::clone(&process));
        write(&self.snapshot).process = Some(Arc::clone(&process));

        if !process.is_running() {
            return self.launch_failed("process exited immediately after spawn");
        }
        info!(target: SESSION_TARGET, pid = process.pid(), "Vue Language Server started");

        let mut connection = Connection::new(
            spawned.connector,
            self.protocol.default_notification_sink(),
        );
        let started = connection.start();
        let connection = Arc::new(connection);
        lifecycle.connection = Some(Arc::clone(&connection));

        let handshake = started
            .and_then(|()| connection.await_server_connection(self.config.handshake_timeout()));
        if let Err(failure) = handshake {
            error!(
                target: SESSION_TARGET,
                %failure,
                "Vue Language Server failed to start, or did not connect successfully"
            );
            let outcome = if failure.is_timeout() {
                StartOutcome::HandshakeTimedOut
            } else {
                StartOutcome::LaunchFailed
            };
            let report = self.stop_locked(lifecycle);
            debug!(target: SESSION_TARGET, killed = report.killed, "handshake teardown finished");
            write(&self.snapshot).last_failure = Some(failure.to_string());
            return outcome;
        }

        if let Err(failure) = self.protocol.send_initialize(&connection, context) {
            warn!(target: SESSION_TARGET, %failure, "failed to send initialize");
        }

        let mut snapshot = write(&self.snapshot);
        snapshot.connection = Some(connection);
        snapshot.status = ServerStatus::Running;
        snapshot.last_failure = None;
        StartOutcome::Started
    }

    fn launch_failed(&self, reason: &str) -> StartOutcome {
        error!(target: SESSION_TARGET, reason, "Vue Language Server failed to start");
        let mut snapshot = write(&self.snapshot);
        snapshot.status = ServerStatus::Failed(reason.to_owned());
        snapshot.last_failure = Some(reason.to_owned());
        StartOutcome::LaunchFailed
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) -> ShutdownReport {
        info!(target: SESSION_TARGET, "shutting down Vue Language Server");
        let mut report = ShutdownReport::default();

        if let Some(process) = &lifecycle.process {
            process.close_stderr();
        }
        if let Some(connection) = &lifecycle.connection {
            connection.stop();
        }

        let Some(process) = lifecycle.process.clone().filter(|process| process.is_running()) else {
            info!(target: SESSION_TARGET, "Vue Language Server not running");
            self.clean_up(lifecycle);
            return report;
        };

        report.pid = Some(process.pid());
        self.set_status(ServerStatus::Stopping);
        info!(target: SESSION_TARGET, pid = process.pid(), "stopping Vue Language Server");

        match &lifecycle.connection {
            Some(connection) if connection.is_connected() => {
                if let Err(failure) =
                    self.protocol.shutdown_server(connection, self.config.request_timeout())
                {
                    report.errors.push(failure);
                }
                connection.close();
            }
            // Without a handshake there is no channel to ask politely over.
            _ => match process.terminate() {
                Ok(()) => report.killed = true,
                Err(failure) => report.errors.push(failure),
            },
        }

        if let Err(failure) = process.wait_until_terminated(self.config.shutdown_timeout()) {
            report.errors.push(failure);
            match process.terminate() {
                Ok(()) => report.killed = true,
                Err(failure) => report.errors.push(failure),
            }
        }

        for failure in &report.errors {
            warn!(
                target: SESSION_TARGET,
                pid = process.pid(),
                %failure,
                "error while stopping Vue Language Server"
            );
        }
        self.set_status(ServerStatus::Stopped);
        self.clean_up(lifecycle);
        report
    }

    fn clean_up(&self, lifecycle: &mut Lifecycle) {
        debug!(target: SESSION_TARGET, "cleaning up Vue Language Server session");
        let keep_logs = self.config.keep_logfiles();
        if let Some(path) = lifecycle.log_file.take() {
            if !keep_logs {
                if let Err(failure) = remove_if_exists(&path) {
                    warn!(
                        target: SESSION_TARGET,
                        path = %path.display(),
                        %failure,
                        "failed to remove stderr log"
                    );
                }
            }
        }
        if let Some(connection) = lifecycle.connection.take() {
            connection.close();
        }
        lifecycle.process = None;

        {
            let mut snapshot = write(&self.snapshot);
            snapshot.status = ServerStatus::NotStarted;
            snapshot.process = None;
            snapshot.connection = None;
            if !keep_logs {
                snapshot.log_file = None;
            }
        }

        self.protocol.reset();
        self.started.store(false, Ordering::SeqCst);
    }

    fn set_status(&self, status: ServerStatus) {
        debug!(target: SESSION_TARGET, %status, "status changed");
        write(&self.snapshot).status = status;
    }

    /// Whether a start has run since the last cleanup.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether the process exists and the OS reports it alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let process = read(&self.snapshot).process.clone();
        process.is_some_and(|process| process.is_running())
    }

    /// Health as seen by the editor; the same as [`ServerSession::is_running`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.is_running()
    }

    /// Healthy and the server has answered `initialize`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_healthy() && self.protocol.is_initialized()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        read(&self.snapshot).status.clone()
    }

    /// PID of the running process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        let process = read(&self.snapshot).process.clone();
        process
            .filter(|process| process.is_running())
            .map(|process| process.pid())
    }

    /// Current stderr capture file, or the last one when logs are kept.
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        read(&self.snapshot).log_file.clone()
    }

    /// Reason for the most recent failed start.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        read(&self.snapshot).last_failure.clone()
    }

    /// Connection of the running server.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        read(&self.snapshot).connection.clone()
    }

    /// Protocol state shared by every connection of this session.
    #[must_use]
    pub fn protocol(&self) -> &ProtocolClient {
        &self.protocol
    }

    /// Settings the session was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Server executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.command.program
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("command", &self.command)
            .field("status", &self.status())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
