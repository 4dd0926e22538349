//! Tree scanning via the `ignore` crate's walker
//!
//! Unlike a source checkout, a backup must see every regular file, so all
//! of the walker's standard filters (hidden files, `.gitignore`, ...) are
//! turned off. Only explicitly configured exclude globs are skipped.

use std::path::{Component, Path, PathBuf};

use color_eyre::Result;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use tracing::{debug, warn};

use crate::hash::ContentHash;
use crate::snapshot::{FileRecord, TreeId};
use crate::store::ChecksumStore;

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Files fingerprinted and emitted
    pub recorded: usize,
    /// Files or entries that could not be read
    pub skipped: usize,
}

/// Scanner for one directory tree
pub struct Scanner {
    root: PathBuf,
    excludes: Vec<String>,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excludes: Vec::new(),
        }
    }

    /// Skip paths matching these globs (gitignore syntax, relative to the
    /// root)
    #[must_use]
    pub fn excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(patterns.into_iter().map(Into::into));
        self
    }

    fn walk_builder(&self) -> Result<WalkBuilder> {
        let mut builder = WalkBuilder::new(&self.root);
        builder.standard_filters(false).follow_links(false);

        if !self.excludes.is_empty() {
            let mut overrides = OverrideBuilder::new(&self.root);
            for pattern in &self.excludes {
                // A leading '!' turns an override glob into an ignore rule
                overrides.add(&format!("!{pattern}"))?;
            }
            builder.overrides(overrides.build()?);
        }

        Ok(builder)
    }

    /// Fingerprint every regular file and return the records sorted by path.
    ///
    /// # Errors
    /// Returns an error if the exclude globs are invalid. Unreadable files
    /// are logged and skipped.
    pub fn scan(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        self.walk(|record| {
            records.push(record);
            Ok(())
        })?;
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(records)
    }

    /// Fingerprint every regular file, upserting each record into `store`
    /// under `tree` as soon as it is computed.
    ///
    /// # Errors
    /// Returns an error if the exclude globs are invalid or the store fails.
    /// Unreadable files are logged and skipped.
    pub fn scan_into<S>(&self, store: &mut S, tree: TreeId) -> Result<ScanSummary>
    where
        S: ChecksumStore + ?Sized,
    {
        self.walk(|record| {
            let outcome = store.upsert(tree, &record.relative_path, &record.fingerprint)?;
            debug!(
                %tree,
                path = %record.relative_path,
                hash = %record.fingerprint,
                ?outcome,
                "recorded"
            );
            Ok(())
        })
    }

    fn walk(&self, mut emit: impl FnMut(FileRecord) -> Result<()>) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        for result in self.walk_builder()?.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Could not read directory entry: {e}");
                    summary.skipped += 1;
                    continue;
                }
            };

            // Symlinks are not followed, so only real files report is_file
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let Some(relative_path) = relative_path(&self.root, path) else {
                warn!("Skipping non UTF-8 path: {}", path.display());
                summary.skipped += 1;
                continue;
            };

            let fingerprint = match ContentHash::from_file(path) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Could not read file: {}. Check permissions. ({e})", path.display());
                    summary.skipped += 1;
                    continue;
                }
            };

            emit(FileRecord::new(relative_path, fingerprint))?;
            summary.recorded += 1;
        }

        Ok(summary)
    }
}

/// `path` relative to `root`, `/`-separated; `None` if it is outside the
/// root or not valid UTF-8
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}
