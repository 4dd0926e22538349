//! Decide which source files must be copied into the backup
//!
//! A source record is already backed up only when the backup snapshot holds
//! the same path with the same fingerprint. Backup-only paths are ignored;
//! nothing is ever deleted from the backup.

use std::collections::HashSet;

use crate::hash::ContentHash;
use crate::snapshot::FileRecord;

/// Why a path is on the worklist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The backup has no record for this path
    Added,
    /// The backup has this path with a different fingerprint
    Modified,
}

/// A single path the copy executor must act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: String,
    pub fingerprint: ContentHash,
    pub kind: ChangeKind,
}

/// Paths needing a copy, in source enumeration order
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    pub items: Vec<WorkItem>,
    /// Source records that already had an identical backup record
    pub unchanged: usize,
}

impl Worklist {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Paths only, in worklist order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.path.as_str())
    }

    #[must_use]
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.items.iter().filter(|item| item.kind == kind).count()
    }
}

/// Compare the source snapshot against the backup snapshot.
///
/// Runs in O(sources + backups): the backup side is indexed by
/// `(path, fingerprint)` pairs and by path alone.
#[must_use]
pub fn plan(source: &[FileRecord], backup: &[FileRecord]) -> Worklist {
    let backed_up: HashSet<(&str, &ContentHash)> = backup
        .iter()
        .map(|r| (r.relative_path.as_str(), &r.fingerprint))
        .collect();
    let backup_paths: HashSet<&str> = backup.iter().map(|r| r.relative_path.as_str()).collect();

    let mut worklist = Worklist::default();

    for record in source {
        let path = record.relative_path.as_str();
        if backed_up.contains(&(path, &record.fingerprint)) {
            worklist.unchanged += 1;
            continue;
        }

        let kind = if backup_paths.contains(path) {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        worklist.items.push(WorkItem {
            path: record.relative_path.clone(),
            fingerprint: record.fingerprint,
            kind,
        });
    }

    worklist
}
