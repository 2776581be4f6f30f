//! Executable Permissions
//!
//! Marks a file executable by running `chmod +x` through a shell.
//! Only Unix-like platforms have an execute bit; elsewhere this is a no-op.

use std::path::Path;

use super::command_runner::{ProcessRunner, Result};

/// Shell used to run `chmod` unless the runner overrides it
pub const DEFAULT_SHELL: &str = "/bin/sh";

impl ProcessRunner {
    /// Add execute permission to `path`.
    ///
    /// Runs `<shell> -c "chmod +x '<path>'"` and fails if chmod writes
    /// anything to stderr. The path is not checked beforehand.
    #[cfg(unix)]
    pub fn enable_executable_permissions(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let shell = self.shell().to_string_lossy();

        tracing::debug!("Enabling executable permissions for {}", path.display());
        self.run_executable(&shell, &chmod_arguments(path), true)?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn enable_executable_permissions(&self, path: impl AsRef<Path>) -> Result<()> {
        tracing::debug!(
            "Skipping executable permissions for {}: not a Unix platform",
            path.as_ref().display()
        );
        Ok(())
    }
}

/// Add execute permission to `path` with the default runner.
pub fn enable_executable_permissions(path: impl AsRef<Path>) -> Result<()> {
    ProcessRunner::new().enable_executable_permissions(path)
}

/// Argument line for `<shell> -c "chmod +x '<path>'"`
pub fn chmod_arguments(path: &Path) -> String {
    let path = path.to_string_lossy();
    let script = format!("chmod +x {}", shell_words::quote(&path));
    format!("-c {}", shell_words::quote(&script))
}
