//! Shared fixtures and fakes for host tests.

mod launcher;
mod scripted_server;
mod world;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rstest::fixture;
use vls_config::Config;

use crate::connection::{Connector, NotificationSink};
use crate::jsonrpc::JsonRpcNotification;
use crate::process::ServerStreams;
use crate::protocol::RequestContext;

pub use launcher::{FakeLauncher, LaunchMode};
pub use scripted_server::{FakeServerBehaviour, ReceivedMessage, ScriptedServer};
pub use world::{SessionWorld, eventually};

/// Generous bound for waits that normally finish in milliseconds.
pub const WAIT: Duration = Duration::from_secs(5);

/// Configuration with short deadlines and logs under `log_directory`.
pub fn test_config(log_directory: &Path) -> Config {
    Config {
        handshake_timeout_ms: 2_000,
        shutdown_timeout_secs: 1,
        request_timeout_secs: 5,
        log_directory: Some(log_directory.to_path_buf()),
        ..Config::default()
    }
}

/// Context for a Vue buffer inside `/project`.
#[fixture]
pub fn vue_context() -> RequestContext {
    let mut context = RequestContext::for_file(
        "/project/src/App.vue",
        "<template><div>{{ title }}</div></template>\n",
    );
    context.working_dir = Some(PathBuf::from("/project"));
    context
}

/// Sink recording every notification it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<(Mutex<Vec<JsonRpcNotification>>, Condvar)>,
}

impl RecordingSink {
    /// Waits until at least `count` notifications arrived, returning what
    /// was recorded when the wait ended.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<JsonRpcNotification> {
        let (records, signal) = &*self.inner;
        let guard = records.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = signal
            .wait_timeout_while(guard, timeout, |records| records.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }
}

impl NotificationSink for RecordingSink {
    fn handle_notification(&self, notification: JsonRpcNotification) {
        let (records, signal) = &*self.inner;
        records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        signal.notify_all();
    }
}

/// Connector that never produces streams before giving up.
pub struct StalledConnector {
    delay: Duration,
}

impl StalledConnector {
    /// Stalls for `delay`, then fails.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Connector for StalledConnector {
    fn connect(self: Box<Self>) -> io::Result<ServerStreams> {
        thread::sleep(self.delay);
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "server never opened its streams",
        ))
    }
}
