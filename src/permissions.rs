//! Ownership fix-up for mounted volumes.
//!
//! Volumes mounted from the host may be missing on first run or owned by a
//! host uid. Everything here is best-effort: a failing entry is reported and
//! the walk moves on, so every run fixes whatever it can reach.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Uid, User};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::MountSpec;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Failed to look up user {name}: {source}")]
    Lookup { name: String, source: nix::Error },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

pub type PermissionResult<T> = Result<T, PermissionError>;

/// The unprivileged account that owns the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl ServiceUser {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            home: home.into(),
        }
    }

    /// Resolve a user through the system password database.
    pub fn lookup(name: &str) -> PermissionResult<Self> {
        let user = User::from_name(name)
            .map_err(|source| PermissionError::Lookup {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| PermissionError::UnknownUser(name.to_string()))?;

        Ok(Self::new(
            user.name,
            user.uid.as_raw(),
            user.gid.as_raw(),
            user.dir,
        ))
    }

    /// Whether this process already runs with the user's uid.
    pub fn is_current_process(&self) -> bool {
        Uid::effective().as_raw() == self.uid
    }

    /// The effective uid and gid of the running tests.
    #[cfg(test)]
    pub(crate) fn current() -> Self {
        let uid = Uid::effective();
        let gid = nix::unistd::Gid::effective();
        Self::new(uid.to_string(), uid.as_raw(), gid.as_raw(), "/")
    }
}

/// Hand a single file or directory to the user. Does nothing if it already
/// belongs to them.
pub fn set_owner(path: &Path, user: &ServiceUser) -> PermissionResult<bool> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    if meta.uid() == user.uid && meta.gid() == user.gid {
        return Ok(false);
    }
    std::os::unix::fs::lchown(path, Some(user.uid), Some(user.gid))
        .map_err(|e| io_err(path, e))?;
    Ok(true)
}

/// Result of fixing one tree.
#[derive(Debug, Default)]
pub struct TreeOwnership {
    pub changed: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Recursively hand a tree to the user without following symlinks.
///
/// An entry that cannot be read or changed is recorded and skipped; the rest
/// of the tree is still processed.
pub fn set_owner_recursive(root: &Path, user: &ServiceUser) -> TreeOwnership {
    apply_to_tree(root, |path| set_owner(path, user))
}

fn apply_to_tree<F>(root: &Path, mut apply: F) -> TreeOwnership
where
    F: FnMut(&Path) -> PermissionResult<bool>,
{
    let mut tree = TreeOwnership::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let result = match entry {
            Ok(entry) => apply(entry.path()).map_err(|e| (entry.path().to_path_buf(), e)),
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                Err((path.clone(), PermissionError::Walk { path, source: e }))
            }
        };

        match result {
            Ok(true) => tree.changed += 1,
            Ok(false) => {}
            Err((path, e)) => {
                tracing::warn!(path = %path.display(), "Could not fix ownership: {}", e);
                tree.failures.push((path, e.to_string()));
            }
        }
    }

    tree
}

#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub paths: usize,
    /// Number of entries whose ownership was changed.
    pub changed: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Create each mount (and its subdirectories) and give it to `user`.
///
/// With no user only directories are created. Failures are collected and
/// logged; they never abort the remaining entries or mounts.
pub fn normalize_mounts(mounts: &[MountSpec], user: Option<&ServiceUser>) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    for mount in mounts {
        report.paths += 1;

        if let Err(e) = create_mount_dirs(mount) {
            tracing::warn!(path = %mount.path.display(), "Could not create mount: {}", e);
            report.failures.push((mount.path.clone(), e.to_string()));
            continue;
        }

        let Some(user) = user else { continue };
        let tree = set_owner_recursive(&mount.path, user);
        if tree.changed > 0 {
            tracing::info!(
                path = %mount.path.display(),
                changed = tree.changed,
                "Fixed ownership of mounted volume"
            );
        } else if tree.failures.is_empty() {
            tracing::debug!(
                path = %mount.path.display(),
                "Mount ownership already correct"
            );
        }
        report.changed += tree.changed;
        report.failures.extend(tree.failures);
    }

    report
}

fn create_mount_dirs(mount: &MountSpec) -> PermissionResult<()> {
    std::fs::create_dir_all(&mount.path).map_err(|e| io_err(&mount.path, e))?;
    for sub in &mount.subdirs {
        let dir = mount.path.join(sub);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> PermissionError {
    PermissionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn nobody() -> ServiceUser {
        ServiceUser::new("nobody", 65534, 65534, "/")
    }

    fn owner_of(path: &Path) -> (u32, u32) {
        let meta = std::fs::symlink_metadata(path).unwrap();
        (meta.uid(), meta.gid())
    }

    #[test]
    fn test_creates_mounts_and_subdirs() {
        let temp = tempdir().unwrap();
        let mounts = vec![
            MountSpec::new(temp.path().join("data")).with_subdirs(&["storage", "log"]),
            MountSpec::new(temp.path().join("config")),
        ];

        let report = normalize_mounts(&mounts, None);

        assert_eq!(report.paths, 2);
        assert!(report.failures.is_empty());
        assert!(temp.path().join("data/storage").is_dir());
        assert!(temp.path().join("data/log").is_dir());
        assert!(temp.path().join("config").is_dir());
    }

    #[test]
    fn test_owned_tree_is_a_noop() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std::fs::write(temp.path().join("a/b/file.txt"), "x").unwrap();

        let me = ServiceUser::current();
        let mounts = vec![MountSpec::new(temp.path().join("a"))];

        let report = normalize_mounts(&mounts, Some(&me));
        assert!(report.failures.is_empty());
        assert_eq!(report.changed, 0);

        // Repeating converges to the same result.
        let again = normalize_mounts(&mounts, Some(&me));
        assert_eq!(again.changed, 0);
    }

    #[test]
    fn test_foreign_tree_is_handed_over_then_converges() {
        if !Uid::effective().is_root() {
            return;
        }
        let temp = tempdir().unwrap();
        let root = temp.path().join("workspace");
        std::fs::create_dir_all(root.join("notebooks")).unwrap();
        std::fs::write(root.join("notebooks/a.ipynb"), "{}").unwrap();
        std::os::unix::fs::symlink("/etc/passwd", root.join("link")).unwrap();

        let mounts = vec![MountSpec::new(&root).with_subdirs(&["projects"])];
        let user = nobody();

        let first = normalize_mounts(&mounts, Some(&user));
        assert!(first.failures.is_empty());
        // workspace, notebooks, a.ipynb, link, projects
        assert_eq!(first.changed, 5);
        assert_eq!(owner_of(&root.join("notebooks/a.ipynb")), (65534, 65534));
        assert_eq!(owner_of(&root.join("projects")), (65534, 65534));
        // The link itself changes hands, never its target.
        assert_eq!(owner_of(&root.join("link")), (65534, 65534));
        assert_eq!(owner_of(Path::new("/etc/passwd")), (0, 0));

        let second = normalize_mounts(&mounts, Some(&user));
        assert!(second.failures.is_empty());
        assert_eq!(second.changed, 0);
    }

    #[test]
    fn test_failing_entry_does_not_stop_the_walk() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("workspace");
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("b/file"), "x").unwrap();
        std::fs::write(root.join("c"), "x").unwrap();

        let blocked = root.join("a");
        let mut visited = Vec::new();
        let tree = apply_to_tree(&root, |path| {
            visited.push(path.to_path_buf());
            if path == blocked {
                Err(io_err(path, std::io::Error::from_raw_os_error(30)))
            } else {
                Ok(true)
            }
        });

        assert_eq!(tree.failures.len(), 1);
        assert_eq!(tree.failures[0].0, blocked);
        assert_eq!(tree.changed, 4);
        assert!(visited.contains(&root.join("b/file")));
        assert!(visited.contains(&root.join("c")));
    }

    #[test]
    fn test_missing_root_is_recorded_not_fatal() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("gone");

        let tree = set_owner_recursive(&missing, &ServiceUser::current());

        assert_eq!(tree.changed, 0);
        assert_eq!(tree.failures.len(), 1);
        assert_eq!(tree.failures[0].0, missing);
    }

    #[test]
    fn test_failure_on_one_mount_does_not_stop_others() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mounts = vec![
            MountSpec::new(blocker.join("child")),
            MountSpec::new(temp.path().join("ok")),
        ];

        let report = normalize_mounts(&mounts, None);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, blocker.join("child"));
        assert!(temp.path().join("ok").is_dir());
    }

    #[test]
    fn test_lookup_unknown_user() {
        let err = ServiceUser::lookup("no-such-user-jupyagent-test").unwrap_err();
        assert!(matches!(err, PermissionError::UnknownUser(_)));
    }

    #[test]
    fn test_lookup_root() {
        let root = ServiceUser::lookup("root").unwrap();
        assert_eq!(root.uid, 0);
        assert_eq!(root.gid, 0);
        assert_eq!(root.name, "root");
    }
}
