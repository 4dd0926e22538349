//! Replace backup files with the current source content
//!
//! Every failure here is per-file: it is logged, reported as a
//! [`CopyOutcome`] and never stops the pass.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

/// What happened to one worklist path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// No backup file existed; the source file was copied in
    Created,
    /// A stale backup file was deleted and the source file copied in
    Replaced,
    /// The existing backup file is not writable, so it was left alone
    SkippedReadOnly,
    /// The existing backup file could not be deleted
    SkippedUndeletable(String),
    /// The copy itself failed
    Failed(String),
}

impl CopyOutcome {
    /// Whether the backup now holds the source content
    #[must_use]
    pub fn is_copied(&self) -> bool {
        matches!(self, Self::Created | Self::Replaced)
    }
}

/// Copies worklist paths from the source root into the backup root
#[derive(Debug, Clone)]
pub struct CopyExecutor {
    source_root: PathBuf,
    backup_root: PathBuf,
}

impl CopyExecutor {
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            backup_root: backup_root.into(),
        }
    }

    /// Bring the backup copy of `relative_path` up to date.
    pub fn apply(&self, relative_path: &str) -> CopyOutcome {
        let (Some(from), Some(to)) = (
            resolve(&self.source_root, relative_path),
            resolve(&self.backup_root, relative_path),
        ) else {
            error!("Refusing to copy invalid relative path {relative_path:?}");
            return CopyOutcome::Failed(format!("invalid relative path {relative_path:?}"));
        };

        info!("Copying file: {} to {}", from.display(), to.display());

        // Not followed: fs::copy would write through a link to its target
        let existing = fs::symlink_metadata(&to).ok();
        let is_link = existing.as_ref().is_some_and(|m| m.file_type().is_symlink());

        if !is_link && !existing.is_some_and(|m| m.is_file()) {
            return match copy_creating_parents(&from, &to) {
                Ok(bytes) => {
                    debug!(bytes, path = relative_path, "created");
                    CopyOutcome::Created
                }
                Err(e) => {
                    error!("Failed to copy {}: {e}", from.display());
                    CopyOutcome::Failed(e.to_string())
                }
            };
        }

        if !is_link && !is_writable(&to) {
            warn!("Backup file is not writable, skipping: {}", to.display());
            return CopyOutcome::SkippedReadOnly;
        }

        if let Err(e) = fs::remove_file(&to) {
            error!("Failed to delete old backup file {}: {e}. Skipping.", to.display());
            return CopyOutcome::SkippedUndeletable(e.to_string());
        }
        debug!("Deleted stale backup entry {}", to.display());

        match copy_creating_parents(&from, &to) {
            Ok(bytes) => {
                debug!(bytes, path = relative_path, "replaced");
                CopyOutcome::Replaced
            }
            Err(e) => {
                error!("Failed to copy {}: {e}", from.display());
                CopyOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Join a `/`-separated relative path onto `root`. Rejects anything that
/// could escape the root.
fn resolve(root: &Path, relative_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for part in relative_path.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return None;
        }
        path.push(part);
    }
    Some(path)
}

/// Whether the current process may write to `path`
fn is_writable(path: &Path) -> bool {
    OpenOptions::new().write(true).open(path).is_ok()
}

/// Copy `from` to `to`. If the destination directory is missing, create it
/// and retry once.
fn copy_creating_parents(from: &Path, to: &Path) -> io::Result<u64> {
    match fs::copy(from, to) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let Some(parent) = to.parent() else {
                return Err(e);
            };
            debug!("Directory not found, creating {}", parent.display());
            fs::create_dir_all(parent)?;
            fs::copy(from, to)
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Trees {
        source: TempDir,
        backup: TempDir,
    }

    impl Trees {
        fn new() -> Self {
            Self {
                source: TempDir::new().unwrap(),
                backup: TempDir::new().unwrap(),
            }
        }

        fn executor(&self) -> CopyExecutor {
            CopyExecutor::new(self.source.path(), self.backup.path())
        }
    }

    #[test]
    fn test_copy_creates_missing_directories() {
        let trees = Trees::new();
        fs::create_dir_all(trees.source.path().join("a/b")).unwrap();
        fs::write(trees.source.path().join("a/b/c.txt"), "content").unwrap();

        let outcome = trees.executor().apply("a/b/c.txt");

        assert_eq!(outcome, CopyOutcome::Created);
        assert_eq!(
            fs::read_to_string(trees.backup.path().join("a/b/c.txt")).unwrap(),
            "content"
        );
    }

    #[test]
    fn test_copy_replaces_stale_file() {
        let trees = Trees::new();
        fs::write(trees.source.path().join("file1.bin"), "X").unwrap();
        fs::write(trees.backup.path().join("file1.bin"), "Z").unwrap();

        let outcome = trees.executor().apply("file1.bin");

        assert_eq!(outcome, CopyOutcome::Replaced);
        assert_eq!(
            fs::read_to_string(trees.backup.path().join("file1.bin")).unwrap(),
            "X"
        );
    }

    #[test]
    fn test_missing_source_is_failure_not_panic() {
        let trees = Trees::new();

        let outcome = trees.executor().apply("gone.txt");

        assert!(matches!(outcome, CopyOutcome::Failed(_)));
        assert!(!outcome.is_copied());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let trees = Trees::new();
        let executor = trees.executor();

        assert!(matches!(executor.apply("../etc/passwd"), CopyOutcome::Failed(_)));
        assert!(matches!(executor.apply("/abs"), CopyOutcome::Failed(_)));
        assert!(matches!(executor.apply("a//b"), CopyOutcome::Failed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_in_backup_is_replaced_not_followed() {
        let trees = Trees::new();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("victim.txt");
        let dest = trees.backup.path().join("file.txt");
        fs::write(trees.source.path().join("file.txt"), "content").unwrap();
        std::os::unix::fs::symlink(&target, &dest).unwrap();

        let outcome = trees.executor().apply("file.txt");

        assert_eq!(outcome, CopyOutcome::Replaced);
        assert!(!target.exists());
        assert!(!fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "content");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_existing_file_is_not_overwritten() {
        let trees = Trees::new();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("keep.txt");
        fs::write(&target, "untouched").unwrap();
        fs::write(trees.source.path().join("file.txt"), "content").unwrap();
        std::os::unix::fs::symlink(&target, trees.backup.path().join("file.txt")).unwrap();

        let outcome = trees.executor().apply("file.txt");

        assert_eq!(outcome, CopyOutcome::Replaced);
        assert_eq!(fs::read_to_string(&target).unwrap(), "untouched");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_backup_is_skipped() {
        use std::os::unix::fs::PermissionsExt as _;

        let trees = Trees::new();
        let dest = trees.backup.path().join("locked.txt");
        fs::write(trees.source.path().join("locked.txt"), "new").unwrap();
        fs::write(&dest, "old").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o444)).unwrap();

        if is_writable(&dest) {
            eprintln!("skipping test_read_only_backup_is_skipped: permission bits are not enforced");
            return;
        }

        let outcome = trees.executor().apply("locked.txt");

        assert_eq!(outcome, CopyOutcome::SkippedReadOnly);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    }

    #[cfg(unix)]
    #[test]
    fn test_undeletable_backup_is_skipped() {
        use std::os::unix::fs::PermissionsExt as _;

        let trees = Trees::new();
        let locked_dir = trees.backup.path().join("sealed");
        fs::create_dir(&locked_dir).unwrap();
        fs::create_dir(trees.source.path().join("sealed")).unwrap();
        fs::write(trees.source.path().join("sealed/f.txt"), "new").unwrap();
        fs::write(locked_dir.join("f.txt"), "old").unwrap();
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o555)).unwrap();

        let privileged = fs::write(locked_dir.join("write_check"), "").is_ok();
        let outcome = trees.executor().apply("sealed/f.txt");
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o755)).unwrap();

        if privileged {
            eprintln!("skipping test_undeletable_backup_is_skipped: permission bits are not enforced");
            return;
        }

        assert!(matches!(outcome, CopyOutcome::SkippedUndeletable(_)));
        assert_eq!(fs::read_to_string(locked_dir.join("f.txt")).unwrap(), "old");
    }
}
