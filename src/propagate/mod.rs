//! Token propagation into agent configuration files.
//!
//! Two files receive the token with different rules:
//! - the opencode sidecar config is rendered from a template on every start
//!   (see [`template`]);
//! - the agent's own `.claude.json` is merged in place so that user state in
//!   the same document survives (see [`agent_config`]).

pub mod agent_config;
pub mod template;

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::permissions::PermissionError;

pub use agent_config::{jupyter_entry, merge_agent_config, McpServerEntry, MergeOutcome};
pub use template::{render_sidecar_config, render_template};

#[derive(Debug, Error)]
pub enum PropagateError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Expected a JSON object at {key} in {}", path.display())]
    NotAnObject { path: PathBuf, key: String },

    #[error("Failed to replace {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[error(transparent)]
    Owner(#[from] PermissionError),
}

pub type PropagateResult<T> = Result<T, PropagateError>;

pub(crate) fn io_err(path: &Path, source: std::io::Error) -> PropagateError {
    PropagateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// The temporary file is created next to the target so the final rename
/// stays on one filesystem.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> PropagateResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".jupyagent-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| io_err(dir, e))?;

    tmp.write_all(contents).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| PropagateError::Persist {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parent_and_sets_mode() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested/dir/file.txt");

        write_atomic(&path, b"hello", 0o644).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("file.txt");
        std::fs::write(&path, "old contents that are longer").unwrap();

        write_atomic(&path, b"new", 0o600).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
