//! Spawning and supervising the server process.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{LaunchError, ShutdownError};

/// Log target for process operations.
pub(crate) const PROCESS_TARGET: &str = "vls_host::process";

/// Interval between liveness polls while waiting for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Arguments putting the server in stdio protocol mode.
pub const STDIO_ARGS: [&str; 1] = ["--stdio"];

/// Command line used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Builds the stdio-mode command for a server executable.
    #[must_use]
    pub fn stdio(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: STDIO_ARGS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// OS process primitives the handle needs.
pub trait ServerProcess: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Returns `true` once the process has exited, without blocking.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the OS.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Forcibly terminates the process.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the OS.
    fn kill(&mut self) -> io::Result<()>;
}

impl ServerProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        self.try_wait().map(|status| status.is_some())
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)?;
        // Reap so the PID does not linger as a zombie.
        self.wait().map(|_| ())
    }
}

/// Owns the spawned process and its stderr log handle.
pub struct ProcessHandle {
    pid: u32,
    process: Mutex<Box<dyn ServerProcess>>,
    stderr: Mutex<Option<File>>,
}

impl ProcessHandle {
    /// Wraps a spawned process.
    #[must_use]
    pub fn new(process: Box<dyn ServerProcess>, stderr: Option<File>) -> Self {
        Self {
            pid: process.id(),
            process: Mutex::new(process),
            stderr: Mutex::new(stderr),
        }
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the OS reports the process alive.
    ///
    /// A failed status query counts as not running.
    pub fn is_running(&self) -> bool {
        let mut process = self
            .process
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        match process.has_exited() {
            Ok(exited) => !exited,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid = self.pid,
                    %error,
                    "failed to query process status"
                );
                false
            }
        }
    }

    /// Releases the log file descriptor held for the child's stderr.
    pub fn close_stderr(&self) {
        let mut stderr = self
            .stderr
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if stderr.take().is_some() {
            debug!(target: PROCESS_TARGET, pid = self.pid, "closed stderr log handle");
        }
    }

    /// Forcibly terminates the process if it is still running.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Process`] if the kill fails.
    pub fn terminate(&self) -> Result<(), ShutdownError> {
        let mut process = self
            .process
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if process.has_exited().map_err(ShutdownError::Process)? {
            return Ok(());
        }
        process.kill().map_err(ShutdownError::Process)
    }

    /// Blocks until the process exits or `timeout` elapses.
    ///
    /// A timeout too large to add to the current instant waits without a
    /// deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::TerminationTimeout`] when the deadline passes
    /// and [`ShutdownError::Process`] when polling fails.
    pub fn wait_until_terminated(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let exited = {
                let mut process = self
                    .process
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner());
                process.has_exited().map_err(ShutdownError::Process)?
            };
            if exited {
                return Ok(());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(ShutdownError::TerminationTimeout {
                    pid: self.pid,
                    timeout_secs: timeout.as_secs(),
                });
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let process = self
            .process
            .get_mut()
            .unwrap_or_else(|poison| poison.into_inner());
        if matches!(process.has_exited(), Ok(false)) {
            if let Err(error) = process.kill() {
                warn!(
                    target: PROCESS_TARGET,
                    pid = self.pid,
                    %error,
                    "failed to kill language server process on drop"
                );
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

/// Server's stdin and stdout, handed to the connection.
pub struct ServerStreams {
    /// Writes to the server.
    pub stdin: Box<dyn Write + Send>,
    /// Reads from the server.
    pub stdout: Box<dyn Read + Send>,
}

/// A freshly spawned server, before a connection is attached.
pub struct SpawnedServer {
    /// Process handle.
    pub handle: ProcessHandle,
    /// Connection-establishment step for the process streams.
    pub connector: Box<dyn crate::connection::Connector>,
}

/// Facility that launches the server process.
pub trait ServerLauncher: Send + Sync {
    /// Spawns `command` with piped stdio and stderr redirected to `stderr`.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] when the process cannot be started.
    fn spawn(&self, command: &LaunchCommand, stderr: File) -> Result<SpawnedServer, LaunchError>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher {
    working_dir: Option<PathBuf>,
}

impl SystemLauncher {
    /// Launches processes in the current directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl ServerLauncher for SystemLauncher {
    fn spawn(&self, command: &LaunchCommand, stderr: File) -> Result<SpawnedServer, LaunchError> {
        debug!(
            target: PROCESS_TARGET,
            program = %command.program.display(),
            args = ?command.args,
            "spawning language server process"
        );

        let log_handle = stderr.try_clone().map_err(|source| LaunchError::SpawnFailed {
            message: String::from("failed to duplicate stderr log handle"),
            source,
        })?;

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr));
        if let Some(dir) = self.working_dir() {
            process.current_dir(dir);
        }

        let mut child = process.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LaunchError::BinaryNotFound {
                    command: command.program.display().to_string(),
                    source,
                }
            } else {
                LaunchError::SpawnFailed {
                    message: format!("failed to start {}", command.program.display()),
                    source,
                }
            }
        })?;

        let streams = take_streams(&mut child);
        let handle = ProcessHandle::new(Box::new(child), Some(log_handle));
        let streams = streams?;

        debug!(
            target: PROCESS_TARGET,
            pid = handle.pid(),
            "language server process spawned"
        );

        Ok(SpawnedServer {
            handle,
            connector: Box::new(crate::connection::StdioConnector::new(streams)),
        })
    }
}

fn take_streams(child: &mut Child) -> Result<ServerStreams, LaunchError> {
    let stdin = child
        .stdin
        .take()
        .ok_or(LaunchError::MissingPipe { stream: "stdin" })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(LaunchError::MissingPipe { stream: "stdout" })?;
    Ok(ServerStreams {
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
    })
}
