//! Snapshot: the recorded fingerprints of one directory tree

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Which of the two trees a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeId {
    /// The tree being backed up
    Source,
    /// The backup copy
    Backup,
}

impl TreeId {
    /// Stable lowercase name, used in store table names and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file's observed state at scan time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the tree root, `/`-separated
    pub relative_path: String,
    /// Fingerprint of the file's full content
    pub fingerprint: ContentHash,
}

impl FileRecord {
    #[must_use]
    pub fn new(relative_path: impl Into<String>, fingerprint: ContentHash) -> Self {
        Self {
            relative_path: relative_path.into(),
            fingerprint,
        }
    }
}

/// All records of one tree, keyed by relative path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: HashMap<String, ContentHash>,
}

impl Snapshot {
    /// Build a snapshot from records. A later record for the same path wins.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let files = records
            .into_iter()
            .map(|r| (r.relative_path, r.fingerprint))
            .collect();
        Self { files }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Get the fingerprint recorded for a path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ContentHash> {
        self.files.get(path)
    }

    /// Records sorted by path
    #[must_use]
    pub fn to_sorted_records(&self) -> Vec<FileRecord> {
        let mut records: Vec<_> = self
            .files
            .iter()
            .map(|(path, hash)| FileRecord::new(path.clone(), *hash))
            .collect();
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        records
    }
}
