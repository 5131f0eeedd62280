//! Bootstrap utilities.

use std::path::{Path, PathBuf};

use oryx_error::{ErrorContext as _, GenericError};
use tracing::{debug, warn};

/// A file holding the ID of the current process.
///
/// The file is written when created and removed when dropped.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process ID to `path`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// If the file cannot be written, an error is returned.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, GenericError> {
        let path = path.as_ref().to_path_buf();
        let pid = std::process::id();

        std::fs::write(&path, format!("{}\n", pid))
            .with_error_context(|| format!("Failed to write PID file '{}'.", path.display()))?;

        debug!(pid, file_path = %path.display(), "PID file written.");
        Ok(Self { path })
    }

    /// Returns the path of the PID file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(file_path = %self.path.display(), error = %e, "Failed to remove PID file.");
        }
    }
}
