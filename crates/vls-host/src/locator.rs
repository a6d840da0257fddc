//! Discovery of the runtime and server executables.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use vls_config::Config;

const LOCATOR_TARGET: &str = "vls_host::locator";

/// Path of the bundled server script relative to the installation root.
const BUNDLED_SERVER: [&str; 5] = ["third_party", "vls", "node_modules", ".bin", "vls"];

/// Resolves executables on the host system.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutableLocator: Send + Sync {
    /// Finds the first executable named `name` on `PATH`.
    fn find_runtime(&self, name: &str) -> Option<PathBuf>;

    /// Whether `path` exists on disk.
    fn exists(&self, path: &Path) -> bool;
}

/// Locator backed by the real filesystem and `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLocator;

impl ExecutableLocator for SystemLocator {
    fn find_runtime(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Locations of the runtime and the server entry script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    /// Runtime (`node`) resolved on `PATH`, if any.
    pub runtime: Option<PathBuf>,
    /// Server entry script.
    pub server: PathBuf,
}

impl ServerPaths {
    /// Resolves paths from configuration, falling back to the bundled server
    /// beneath `install_root`.
    pub fn resolve(config: &Config, install_root: &Path, locator: &dyn ExecutableLocator) -> Self {
        let server = config
            .server_path()
            .map_or_else(|| bundled_server(install_root), Path::to_path_buf);
        Self {
            runtime: locator.find_runtime(config.runtime_name()),
            server,
        }
    }
}

/// Path of the server script shipped with an installation.
#[must_use]
pub fn bundled_server(install_root: &Path) -> PathBuf {
    BUNDLED_SERVER
        .iter()
        .fold(install_root.to_path_buf(), |path, part| path.join(part))
}

/// Outcome of the one-time enablement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    /// Runtime and server script are both present.
    Enabled,
    /// The runtime is present but the server script is missing. The completer
    /// is still enabled; starting the server will fail later.
    EnabledWithoutServer,
    /// The runtime is missing; the completer must not be created.
    Disabled,
}

impl Enablement {
    /// Whether the completer should be created.
    #[must_use]
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Decides whether the Vue completer should be enabled.
pub fn should_enable(paths: &ServerPaths, locator: &dyn ExecutableLocator) -> Enablement {
    info!(target: LOCATOR_TARGET, "looking for vls");
    if paths.runtime.is_none() {
        warn!(
            target: LOCATOR_TARGET,
            "not enabling vue completion: could not find nodejs"
        );
        return Enablement::Disabled;
    }

    if !locator.exists(&paths.server) {
        warn!(
            target: LOCATOR_TARGET,
            server = %paths.server.display(),
            "vls is not installed"
        );
        return Enablement::EnabledWithoutServer;
    }

    Enablement::Enabled
}
