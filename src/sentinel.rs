//! Readiness signal for the host dashboard.
//!
//! The dashboard polls the workspace mount for `TOKEN.txt`; once it appears,
//! it opens the web UIs using the token inside.

use std::path::Path;

use crate::credential::Token;
use crate::permissions::{self, ServiceUser};
use crate::propagate::{self, PropagateResult};

const SENTINEL_MODE: u32 = 0o644;

/// Remove a sentinel left over from a previous run.
///
/// Returns whether a file was removed.
pub fn clear_stale(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed stale readiness sentinel");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Publish the token as the readiness sentinel: world-readable, owned by the
/// service user.
pub fn write_sentinel(
    path: &Path,
    token: &Token,
    owner: Option<&ServiceUser>,
) -> PropagateResult<()> {
    propagate::write_atomic(path, token.as_str().as_bytes(), SENTINEL_MODE)?;
    if let Some(owner) = owner {
        permissions::set_owner(path, owner)?;
    }
    tracing::info!(path = %path.display(), "Readiness sentinel written");
    Ok(())
}
