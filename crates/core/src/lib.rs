//! hashmirror-core: Checksum reconciliation engine
//!
//! Fingerprints a source and a backup tree, records the fingerprints in a
//! persistent store and copies every source file whose backup is missing
//! or stale.

pub mod config;
pub mod copy;
pub mod hash;
pub mod pass;
pub mod reconcile;
pub mod scan;
pub mod snapshot;
pub mod store;

pub use config::Config;
pub use copy::{CopyExecutor, CopyOutcome};
pub use hash::ContentHash;
pub use pass::{BackupPass, PassObserver, PassOptions, PassOutcome, PassReport};
pub use reconcile::{ChangeKind, WorkItem, Worklist, plan};
pub use scan::{ScanSummary, Scanner};
pub use snapshot::{FileRecord, Snapshot, TreeId};
pub use store::{ChecksumStore, LmdbStore, MemoryStore, UpsertOutcome};
