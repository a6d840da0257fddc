//! Capture files for the server's stderr.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::LaunchError;

const LOGFILE_TARGET: &str = "vls_host::logfile";

/// Prefix used for stderr capture files.
pub const STDERR_LOG_PREFIX: &str = "vls_stderr_";

/// Creates a fresh, persistent log file in `directory`.
///
/// The file is not removed on drop; [`remove_if_exists`] deletes it once the
/// session is cleaned up.
///
/// # Errors
///
/// Returns [`LaunchError::LogFile`] if the directory or file cannot be created.
pub fn create_log_file(directory: &Path, prefix: &str) -> Result<(File, PathBuf), LaunchError> {
    let to_error = |source: io::Error| LaunchError::LogFile {
        directory: directory.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(directory).map_err(to_error)?;
    let (file, path) = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".log")
        .tempfile_in(directory)
        .map_err(to_error)?
        .keep()
        .map_err(|error| to_error(error.error))?;
    debug!(target: LOGFILE_TARGET, path = %path.display(), "created stderr log");
    Ok((file, path))
}

/// Deletes `path`, treating an already-missing file as success.
///
/// # Errors
///
/// Returns any I/O error other than [`io::ErrorKind::NotFound`].
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn creates_prefixed_log_that_survives_drop() {
        let dir = tempfile::tempdir().expect("tempdir");

        let (file, path) = create_log_file(dir.path(), STDERR_LOG_PREFIX).expect("log file");
        drop(file);

        assert!(path.exists());
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name");
        assert!(name.starts_with(STDERR_LOG_PREFIX));
        assert!(name.ends_with(".log"));
    }

    #[rstest]
    fn remove_if_exists_tolerates_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_, path) = create_log_file(dir.path(), STDERR_LOG_PREFIX).expect("log file");

        remove_if_exists(&path).expect("first removal");
        remove_if_exists(&path).expect("second removal");

        assert!(!path.exists());
    }
}
