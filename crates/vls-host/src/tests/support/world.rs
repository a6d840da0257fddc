//! BDD world wrapping a session and its fake launcher.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use vls_config::Config;

use crate::VueCompleter;
use crate::locator::ServerPaths;
use crate::process::ServerLauncher;
use crate::protocol::RequestContext;
use crate::session::{ServerSession, StartOutcome};

use super::{FakeLauncher, LaunchMode, WAIT, test_config, vue_context};

/// Shared state exercised by step definitions.
pub struct SessionWorld {
    logs: TempDir,
    /// Launcher recording every spawn.
    pub launcher: Arc<FakeLauncher>,
    /// Completer under test.
    pub completer: VueCompleter,
    /// Outcome of the most recent start.
    pub last_outcome: Option<StartOutcome>,
    /// Duration of the most recent health query.
    pub last_health_check: Option<Duration>,
}

impl SessionWorld {
    /// World whose launches behave according to `mode`.
    pub fn new(mode: LaunchMode) -> Self {
        let logs = tempfile::tempdir().expect("log directory");
        let mut config = test_config(logs.path());
        if mode == LaunchMode::StallsHandshake {
            config.handshake_timeout_ms = 100;
        }
        Self::with_config(logs, config, mode)
    }

    fn with_config(logs: TempDir, config: Config, mode: LaunchMode) -> Self {
        let launcher = Arc::new(FakeLauncher::new(mode));
        let paths = ServerPaths {
            runtime: Some("/usr/bin/node".into()),
            server: "/install/third_party/vls/node_modules/.bin/vls".into(),
        };
        let shared: Arc<dyn ServerLauncher> = launcher.clone();
        let completer = VueCompleter::new(config, &paths, shared);
        Self {
            logs,
            launcher,
            completer,
            last_outcome: None,
            last_health_check: None,
        }
    }

    /// Session behind the completer.
    pub fn session(&self) -> &ServerSession {
        self.completer.session()
    }

    /// Editor context used by every step.
    pub fn context(&self) -> RequestContext {
        vue_context()
    }

    /// Starts the session and records the outcome.
    pub fn start(&mut self) {
        let context = self.context();
        self.last_outcome = Some(self.session().start(&context));
    }

    /// Directory receiving stderr logs.
    pub fn log_directory(&self) -> &Path {
        self.logs.path()
    }

    /// Stderr logs currently on disk.
    pub fn log_files(&self) -> usize {
        std::fs::read_dir(self.logs.path())
            .expect("read log directory")
            .count()
    }

    /// Times a health query.
    pub fn check_health(&mut self) -> bool {
        let started = Instant::now();
        let healthy = self.completer.server_is_healthy();
        self.last_health_check = Some(started.elapsed());
        healthy
    }
}

impl Default for SessionWorld {
    fn default() -> Self {
        Self::new(LaunchMode::Healthy)
    }
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
