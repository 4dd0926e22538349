//! One reconciliation pass: scan both trees, plan, copy
//!
//! The scan phase completes for both trees before the worklist is planned,
//! and every store write happens before any copy.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::copy::{CopyExecutor, CopyOutcome};
use crate::reconcile::{self, WorkItem, Worklist};
use crate::scan::{ScanSummary, Scanner};
use crate::snapshot::TreeId;
use crate::store::ChecksumStore;

/// Switches for a single pass
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    /// Plan only, copy nothing
    pub dry_run: bool,
    /// Drop the stored backup records and rescan the backup tree
    pub rescan_backup: bool,
}

/// How a pass ended
#[derive(Debug)]
pub enum PassOutcome {
    /// Both trees were reconciled
    Completed(PassReport),
    /// The source root does not exist; nothing was done
    SourceMissing(PathBuf),
    /// The backup root is missing and could not be created
    BackupUnavailable { path: PathBuf, reason: String },
}

/// Tallies from a completed pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub source_scan: ScanSummary,
    /// `None` when stored backup records were reused
    pub backup_scan: Option<ScanSummary>,
    pub worklist: Worklist,
    pub dry_run: bool,
    pub created: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassReport {
    #[must_use]
    pub fn copied(&self) -> usize {
        self.created + self.replaced
    }

    fn record(&mut self, outcome: &CopyOutcome) {
        match outcome {
            CopyOutcome::Created => self.created += 1,
            CopyOutcome::Replaced => self.replaced += 1,
            CopyOutcome::SkippedReadOnly | CopyOutcome::SkippedUndeletable(_) => self.skipped += 1,
            CopyOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Hooks for reporting pass progress
pub trait PassObserver {
    fn scanning(&mut self, _tree: TreeId, _root: &Path) {}
    fn planned(&mut self, _worklist: &Worklist) {}
    fn copied(&mut self, _item: &WorkItem, _outcome: &CopyOutcome) {}
}

impl PassObserver for () {}

/// A configured backup pass over one source/backup pair
#[derive(Debug, Clone)]
pub struct BackupPass {
    source_root: PathBuf,
    backup_root: PathBuf,
    excludes: Vec<String>,
    options: PassOptions,
}

impl BackupPass {
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            backup_root: backup_root.into(),
            excludes: Vec::new(),
            options: PassOptions::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.folders.source, &config.folders.backup)
            .excludes(config.folders.exclude.clone())
    }

    #[must_use]
    pub fn excludes(mut self, patterns: Vec<String>) -> Self {
        self.excludes = patterns;
        self
    }

    #[must_use]
    pub fn options(mut self, options: PassOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the pass without progress reporting.
    ///
    /// # Errors
    /// Returns an error if the store fails. Per-file problems are counted
    /// in the report instead.
    pub fn run<S>(&self, store: &mut S) -> Result<PassOutcome>
    where
        S: ChecksumStore + ?Sized,
    {
        self.run_observed(store, &mut ())
    }

    /// Run the pass, reporting progress to `observer`.
    ///
    /// # Errors
    /// Returns an error if the store fails. Per-file problems are counted
    /// in the report instead.
    pub fn run_observed<S>(
        &self,
        store: &mut S,
        observer: &mut dyn PassObserver,
    ) -> Result<PassOutcome>
    where
        S: ChecksumStore + ?Sized,
    {
        if !self.source_root.exists() {
            warn!("Original folder does not exist: {}", self.source_root.display());
            return Ok(PassOutcome::SourceMissing(self.source_root.clone()));
        }
        if !self.backup_root.exists() {
            info!("Backup folder does not exist, creating {}", self.backup_root.display());
            if let Err(e) = std::fs::create_dir_all(&self.backup_root) {
                warn!("Failed to create backup folder: {e}");
                return Ok(PassOutcome::BackupUnavailable {
                    path: self.backup_root.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let mut report = PassReport {
            dry_run: self.options.dry_run,
            ..PassReport::default()
        };

        // The source snapshot is rebuilt from scratch every pass
        store.reset(TreeId::Source)?;
        observer.scanning(TreeId::Source, &self.source_root);
        info!("Generating checksums for {}", self.source_root.display());
        report.source_scan = self.scanner(&self.source_root).scan_into(store, TreeId::Source)?;

        if self.options.rescan_backup {
            store.reset(TreeId::Backup)?;
        }
        if store.has_any(TreeId::Backup)? {
            info!("Reusing stored backup checksums");
        } else {
            observer.scanning(TreeId::Backup, &self.backup_root);
            info!("Generating checksums for {}", self.backup_root.display());
            report.backup_scan =
                Some(self.scanner(&self.backup_root).scan_into(store, TreeId::Backup)?);
        }

        let source = store.all(TreeId::Source)?;
        let backup = store.all(TreeId::Backup)?;
        report.worklist = reconcile::plan(&source, &backup);
        observer.planned(&report.worklist);
        info!(
            to_copy = report.worklist.len(),
            unchanged = report.worklist.unchanged,
            "planned"
        );

        if !self.options.dry_run {
            let executor = CopyExecutor::new(&self.source_root, &self.backup_root);
            let items = std::mem::take(&mut report.worklist.items);
            for item in &items {
                let outcome = executor.apply(&item.path);
                observer.copied(item, &outcome);
                report.record(&outcome);
            }
            report.worklist.items = items;
        }

        Ok(PassOutcome::Completed(report))
    }

    fn scanner(&self, root: &Path) -> Scanner {
        Scanner::new(root).excludes(self.excludes.iter().cloned())
    }
}
