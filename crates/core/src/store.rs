//! Persistent fingerprint records for the source and backup trees
//!
//! [`LmdbStore`] keeps one named LMDB database per tree. The key is the
//! BLAKE3 hash of the relative path (LMDB keys are size-limited, paths are
//! not); the value is the 32 digest bytes followed by the UTF-8 path.

use std::collections::HashMap;
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;

use crate::config::validate_namespace;
use crate::hash::ContentHash;
use crate::snapshot::{FileRecord, TreeId};

/// Result of a single upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the path
    Inserted,
    /// A record existed with a different fingerprint and was replaced
    Updated,
    /// The stored fingerprint already matched
    Unchanged,
}

/// The operations the reconciliation engine needs from a record store.
///
/// Each call is independently durable: a crash between two upserts keeps
/// everything committed before it.
pub trait ChecksumStore {
    /// Remove every record for `tree`
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn reset(&mut self, tree: TreeId) -> Result<()>;

    /// Insert or replace the record for `path`; a no-op if it already matches
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    fn upsert(
        &mut self,
        tree: TreeId,
        path: &str,
        fingerprint: &ContentHash,
    ) -> Result<UpsertOutcome>;

    /// Every record currently held for `tree`, in no particular order
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or holds a corrupt record.
    fn all(&self, tree: TreeId) -> Result<Vec<FileRecord>>;

    /// Whether at least one record exists for `tree`
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    fn has_any(&self, tree: TreeId) -> Result<bool>;
}

/// LMDB-backed record store.
pub struct LmdbStore {
    env: Env,
    source: Database<Bytes, Bytes>,
    backup: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open or create a store in the directory `path`, creating the
    /// `<namespace>_source_checksums` and `<namespace>_backup_checksums`
    /// databases if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if the namespace is invalid or the environment
    /// cannot be opened or created.
    #[allow(unsafe_code)]
    pub fn open(path: &Path, namespace: &str) -> Result<Self> {
        validate_namespace(namespace)?;
        std::fs::create_dir_all(path)?;

        // SAFETY: Standard LMDB memory-mapped I/O. The environment directory
        // must not be modified by anything else while it is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(256 * 1024 * 1024) // 256MB max
                .max_dbs(16) // two per namespace
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let source: Database<Bytes, Bytes> = env
            .database_options()
            .types::<Bytes, Bytes>()
            .name(&table_name(namespace, TreeId::Source))
            .create(&mut wtxn)?;
        let backup: Database<Bytes, Bytes> = env
            .database_options()
            .types::<Bytes, Bytes>()
            .name(&table_name(namespace, TreeId::Backup))
            .create(&mut wtxn)?;
        wtxn.commit()?;

        debug!(path = %path.display(), namespace, "opened checksum store");

        Ok(Self {
            env,
            source,
            backup,
        })
    }

    fn db(&self, tree: TreeId) -> Database<Bytes, Bytes> {
        match tree {
            TreeId::Source => self.source,
            TreeId::Backup => self.backup,
        }
    }
}

impl ChecksumStore for LmdbStore {
    fn reset(&mut self, tree: TreeId) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db(tree).clear(&mut wtxn)?;
        wtxn.commit()?;
        debug!(%tree, "cleared records");
        Ok(())
    }

    fn upsert(
        &mut self,
        tree: TreeId,
        path: &str,
        fingerprint: &ContentHash,
    ) -> Result<UpsertOutcome> {
        let db = self.db(tree);
        let key = record_key(path);
        let mut wtxn = self.env.write_txn()?;

        let existing = db
            .get(&wtxn, key.as_bytes())?
            .map(decode_record)
            .transpose()?
            .map(|record| record.fingerprint);

        let outcome = match existing {
            Some(stored) if stored == *fingerprint => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        db.put(&mut wtxn, key.as_bytes(), &encode_record(path, fingerprint))?;
        wtxn.commit()?;
        Ok(outcome)
    }

    fn all(&self, tree: TreeId) -> Result<Vec<FileRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut records = Vec::new();
        for item in self.db(tree).iter(&rtxn)? {
            let (_, value) = item?;
            records.push(decode_record(value)?);
        }
        Ok(records)
    }

    fn has_any(&self, tree: TreeId) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db(tree).first(&rtxn)?.is_some())
    }
}

/// In-memory record store with the same semantics as [`LmdbStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    trees: HashMap<TreeId, HashMap<String, ContentHash>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumStore for MemoryStore {
    fn reset(&mut self, tree: TreeId) -> Result<()> {
        self.trees.remove(&tree);
        Ok(())
    }

    fn upsert(
        &mut self,
        tree: TreeId,
        path: &str,
        fingerprint: &ContentHash,
    ) -> Result<UpsertOutcome> {
        let files = self.trees.entry(tree).or_default();
        let outcome = match files.get(path) {
            Some(stored) if stored == fingerprint => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        if outcome != UpsertOutcome::Unchanged {
            files.insert(path.to_string(), *fingerprint);
        }
        Ok(outcome)
    }

    fn all(&self, tree: TreeId) -> Result<Vec<FileRecord>> {
        Ok(self
            .trees
            .get(&tree)
            .map(|files| {
                files
                    .iter()
                    .map(|(path, hash)| FileRecord::new(path.clone(), *hash))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn has_any(&self, tree: TreeId) -> Result<bool> {
        Ok(self.trees.get(&tree).is_some_and(|files| !files.is_empty()))
    }
}

/// Name of the database holding `tree`'s records
fn table_name(namespace: &str, tree: TreeId) -> String {
    format!("{namespace}_{tree}_checksums")
}

fn record_key(path: &str) -> ContentHash {
    ContentHash::from_bytes(path.as_bytes())
}

fn encode_record(path: &str, fingerprint: &ContentHash) -> Vec<u8> {
    let mut value = Vec::with_capacity(32 + path.len());
    value.extend_from_slice(fingerprint.as_bytes());
    value.extend_from_slice(path.as_bytes());
    value
}

fn decode_record(value: &[u8]) -> Result<FileRecord> {
    let (digest, path) = value
        .split_first_chunk::<32>()
        .ok_or_else(|| eyre!("corrupt record: {} bytes", value.len()))?;
    let path = std::str::from_utf8(path)
        .map_err(|e| eyre!("corrupt record path: {e}"))?;
    Ok(FileRecord::new(path, ContentHash::from_raw(*digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut records: Vec<FileRecord>) -> Vec<FileRecord> {
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        records
    }

    fn exercise_upsert(store: &mut dyn ChecksumStore) {
        let h1 = ContentHash::from_bytes(b"one");
        let h2 = ContentHash::from_bytes(b"two");

        assert!(!store.has_any(TreeId::Source).unwrap());
        assert_eq!(
            store.upsert(TreeId::Source, "a.txt", &h1).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            store.upsert(TreeId::Source, "a.txt", &h1).unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(store.all(TreeId::Source).unwrap(), vec![FileRecord::new("a.txt", h1)]);

        assert_eq!(
            store.upsert(TreeId::Source, "a.txt", &h2).unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(store.all(TreeId::Source).unwrap(), vec![FileRecord::new("a.txt", h2)]);

        // Trees are independent
        assert!(!store.has_any(TreeId::Backup).unwrap());
        assert!(store.all(TreeId::Backup).unwrap().is_empty());
    }

    #[test]
    fn test_lmdb_upsert_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LmdbStore::open(dir.path(), "test").unwrap();
        exercise_upsert(&mut store);
    }

    #[test]
    fn test_memory_upsert_semantics() {
        let mut store = MemoryStore::new();
        exercise_upsert(&mut store);
    }

    #[test]
    fn test_lmdb_reset_only_clears_one_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LmdbStore::open(dir.path(), "test").unwrap();
        let hash = ContentHash::from_bytes(b"x");

        store.upsert(TreeId::Source, "s.txt", &hash).unwrap();
        store.upsert(TreeId::Backup, "b.txt", &hash).unwrap();
        store.reset(TreeId::Source).unwrap();

        assert!(!store.has_any(TreeId::Source).unwrap());
        assert_eq!(store.all(TreeId::Backup).unwrap(), vec![FileRecord::new("b.txt", hash)]);
    }

    #[test]
    fn test_lmdb_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let h1 = ContentHash::from_bytes(b"1");
        let h2 = ContentHash::from_bytes(b"2");

        {
            let mut store = LmdbStore::open(dir.path(), "test").unwrap();
            store.upsert(TreeId::Backup, "dir/one.bin", &h1).unwrap();
            store.upsert(TreeId::Backup, "dir/two.bin", &h2).unwrap();
        }

        let store = LmdbStore::open(dir.path(), "test").unwrap();
        assert_eq!(
            sorted(store.all(TreeId::Backup).unwrap()),
            vec![
                FileRecord::new("dir/one.bin", h1),
                FileRecord::new("dir/two.bin", h2),
            ]
        );
    }

    #[test]
    fn test_lmdb_namespaces_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let hash = ContentHash::from_bytes(b"x");

        {
            let mut store = LmdbStore::open(dir.path(), "alpha").unwrap();
            store.upsert(TreeId::Backup, "a.txt", &hash).unwrap();
        }

        let store = LmdbStore::open(dir.path(), "beta").unwrap();
        assert!(!store.has_any(TreeId::Backup).unwrap());
    }

    #[test]
    fn test_lmdb_long_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LmdbStore::open(dir.path(), "test").unwrap();
        let path = "deep/".repeat(200) + "file.txt";
        let hash = ContentHash::from_bytes(b"deep");

        store.upsert(TreeId::Source, &path, &hash).unwrap();
        assert_eq!(store.all(TreeId::Source).unwrap(), vec![FileRecord::new(path, hash)]);
    }

    #[test]
    fn test_open_rejects_bad_namespace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LmdbStore::open(dir.path(), "drop table;").is_err());
    }

    #[test]
    fn test_decode_rejects_short_value() {
        assert!(decode_record(&[0u8; 8]).is_err());
    }
}
