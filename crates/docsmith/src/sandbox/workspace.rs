use std::fs::{Metadata, Permissions};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use super::SandboxError;

/// Per-invocation scratch space: `input/` (read-only to the sandbox) and
/// `output/`. The whole tree is removed when the value is dropped, on every
/// exit path including unwinding.
#[derive(Debug)]
pub struct SandboxWorkspace {
    root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl SandboxWorkspace {
    /// Creates a fresh workspace under `parent`, or the system temp directory.
    pub fn create(parent: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docsmith-");
        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;

        let input = root.path().join("input");
        let output = root.path().join("output");
        std::fs::create_dir(&input).map_err(SandboxError::Workspace)?;
        std::fs::create_dir(&output).map_err(SandboxError::Workspace)?;

        Ok(Self {
            root,
            input,
            output,
        })
    }

    /// Makes `input/` and everything staged in it read-only. Called once the
    /// context is written and before the sandboxed process starts.
    pub fn seal_input(&self) -> Result<(), SandboxError> {
        set_tree_readonly(&self.input, true).map_err(SandboxError::Workspace)
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }
}

impl Drop for SandboxWorkspace {
    fn drop(&mut self) {
        // A sealed directory cannot be emptied by the `TempDir` cleanup.
        if let Err(e) = set_tree_readonly(&self.input, false) {
            debug!(error = %e, "Failed to unseal sandbox input");
        }
    }
}

/// Applies read-only (or owner-writable) permissions to `path` and, for a
/// directory, everything below it. Symlinks are left alone.
fn set_tree_readonly(path: &Path, readonly: bool) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            set_tree_readonly(&entry?.path(), readonly)?;
        }
    }
    std::fs::set_permissions(path, permissions(&metadata, readonly))
}

#[cfg(unix)]
fn permissions(metadata: &Metadata, readonly: bool) -> Permissions {
    use std::os::unix::fs::PermissionsExt;

    let mode = match (metadata.is_dir(), readonly) {
        (true, true) => 0o555,
        (true, false) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    };
    Permissions::from_mode(mode)
}

#[cfg(not(unix))]
fn permissions(metadata: &Metadata, readonly: bool) -> Permissions {
    let mut permissions = metadata.permissions();
    permissions.set_readonly(readonly);
    permissions
}
