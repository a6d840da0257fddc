//! [`ServerLauncher`] that starts scripted servers instead of processes.

use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::connection::Connector;
use crate::errors::LaunchError;
use crate::process::{LaunchCommand, ProcessHandle, ServerLauncher, SpawnedServer};

use super::StalledConnector;
use super::scripted_server::{FakeServerBehaviour, ScriptedServer};

/// How the next launches behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// Spawns a server that completes the handshake.
    #[default]
    Healthy,
    /// The spawn call itself fails.
    SpawnFails,
    /// The process is already dead when the session checks it.
    ExitsImmediately,
    /// The process runs but never opens its streams.
    StallsHandshake,
    /// The process ignores `exit` and must be killed.
    IgnoresExit,
}

/// Launcher counting spawns and keeping every server it started.
#[derive(Default)]
pub struct FakeLauncher {
    mode: Mutex<LaunchMode>,
    behaviour: FakeServerBehaviour,
    spawn_delay: Duration,
    spawns: AtomicUsize,
    commands: Mutex<Vec<LaunchCommand>>,
    servers: Mutex<Vec<ScriptedServer>>,
}

impl FakeLauncher {
    /// Launcher in `mode` with default server behaviour.
    pub fn new(mode: LaunchMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            ..Self::default()
        }
    }

    /// Uses `behaviour` for servers launched from now on.
    pub fn with_behaviour(mut self, behaviour: FakeServerBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Sleeps this long inside every spawn, widening race windows.
    pub fn with_spawn_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay = delay;
        self
    }

    /// Changes the behaviour of later launches.
    pub fn set_mode(&self, mode: LaunchMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Number of spawn calls so far.
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Commands passed to spawn, in order.
    pub fn commands(&self) -> Vec<LaunchCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every server started so far, oldest first.
    pub fn servers(&self) -> Vec<ScriptedServer> {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recently started server.
    pub fn last_server(&self) -> Option<ScriptedServer> {
        self.servers().pop()
    }

    /// Servers that have not exited.
    pub fn live_servers(&self) -> usize {
        self.servers()
            .iter()
            .filter(|server| !server.has_exited())
            .count()
    }
}

impl ServerLauncher for FakeLauncher {
    fn spawn(&self, command: &LaunchCommand, mut stderr: File) -> Result<SpawnedServer, LaunchError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        if !self.spawn_delay.is_zero() {
            thread::sleep(self.spawn_delay);
        }

        let mode = *self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        if mode == LaunchMode::SpawnFails {
            return Err(LaunchError::SpawnFailed {
                message: format!("failed to start {}", command.program.display()),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "not executable"),
            });
        }

        // Give the capture file some content, as a real server would.
        drop(writeln!(stderr, "scripted server starting"));

        let behaviour = FakeServerBehaviour {
            ignores_exit: self.behaviour.ignores_exit || mode == LaunchMode::IgnoresExit,
            ..self.behaviour.clone()
        };
        let server = ScriptedServer::spawn(behaviour);
        if mode == LaunchMode::ExitsImmediately {
            server.kill();
        }

        let connector: Box<dyn Connector> = if mode == LaunchMode::StallsHandshake {
            Box::new(StalledConnector::new(Duration::from_secs(2)))
        } else {
            server.connector()
        };
        let handle = ProcessHandle::new(Box::new(server.process()), Some(stderr));
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(server);

        Ok(SpawnedServer { handle, connector })
    }
}
